// Identifiers — network-qualified names for mesh bases and mesh objects

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Separates the mesh base part from the local part of an object identifier.
pub const SEPARATOR: char = '#';

/// Substrings a local id may never contain.
pub const DISALLOWED_LOCAL_ID_STRINGS: &[&str] = &[".", "#"];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("Empty identifier")]
    Empty,
    #[error("Not a valid mesh base identifier: {0}")]
    InvalidMeshBaseIdentifier(String),
    #[error("Local id looks like a global identifier: {0}")]
    LocalIdIsGlobal(String),
    #[error("Local id {raw} contains disallowed string {found:?}")]
    DisallowedSubstring { raw: String, found: String },
    #[error("Relative identifier {0} requires a context mesh base")]
    MissingContext(String),
}

// ============================================================================
// MESH BASE IDENTIFIER
// ============================================================================

/// Identifies one mesh base (one peer) on the network.
///
/// Either a URL with an RFC 3986 scheme (`http://example.com/`, `tcp://127.0.0.1:7420`)
/// or an XRI starting with `=` or `@`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NetMeshBaseIdentifier(String);

impl NetMeshBaseIdentifier {
    /// Strict parse.
    pub fn from_external_form(raw: &str) -> Result<Self, IdentifierError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(IdentifierError::Empty);
        }
        if Self::is_valid(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(IdentifierError::InvalidMeshBaseIdentifier(raw.to_string()))
        }
    }

    /// Lenient parse: host-like input without a scheme gets `http://` prepended.
    pub fn guess_from_external_form(raw: &str) -> Result<Self, IdentifierError> {
        let raw = raw.trim();
        if let Ok(found) = Self::from_external_form(raw) {
            return Ok(found);
        }
        if raw.contains('.') || raw.starts_with("localhost") {
            let mut guess = format!("http://{raw}");
            if !raw.contains('/') {
                guess.push('/');
            }
            return Self::from_external_form(&guess);
        }
        Err(IdentifierError::InvalidMeshBaseIdentifier(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_external_form(&self) -> String {
        self.0.clone()
    }

    /// URL scheme, or `None` for XRIs.
    pub fn scheme(&self) -> Option<&str> {
        self.0.split_once("://").map(|(scheme, _)| scheme)
    }

    /// Everything after `scheme://`, or the whole XRI.
    pub fn authority(&self) -> &str {
        self.0.split_once("://").map(|(_, rest)| rest).unwrap_or(&self.0)
    }

    fn is_valid(raw: &str) -> bool {
        if raw.contains(SEPARATOR) || raw.chars().any(char::is_whitespace) {
            return false;
        }
        if let Some(rest) = raw.strip_prefix('=').or_else(|| raw.strip_prefix('@')) {
            return !rest.is_empty();
        }
        match raw.split_once("://") {
            Some((scheme, rest)) => is_scheme(scheme) && !rest.is_empty() && !rest.starts_with('/'),
            None => false,
        }
    }
}

fn is_scheme(candidate: &str) -> bool {
    let mut chars = candidate.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.')
}

impl fmt::Display for NetMeshBaseIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for NetMeshBaseIdentifier {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_external_form(s)
    }
}

impl TryFrom<String> for NetMeshBaseIdentifier {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_external_form(&value)
    }
}

impl From<NetMeshBaseIdentifier> for String {
    fn from(value: NetMeshBaseIdentifier) -> Self {
        value.0
    }
}

// ============================================================================
// MESH OBJECT IDENTIFIER
// ============================================================================

/// Identifies one mesh object: the mesh base that created it plus a local id.
///
/// The home object of a mesh base has an empty local id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NetMeshObjectIdentifier {
    mesh_base: NetMeshBaseIdentifier,
    local_id: String,
}

impl NetMeshObjectIdentifier {
    /// Validates `local_id` and combines it with `mesh_base`.
    pub fn new(mesh_base: NetMeshBaseIdentifier, local_id: &str) -> Result<Self, IdentifierError> {
        check_local_id(local_id)?;
        Ok(Self {
            mesh_base,
            local_id: local_id.to_string(),
        })
    }

    pub fn home(mesh_base: NetMeshBaseIdentifier) -> Self {
        Self {
            mesh_base,
            local_id: String::new(),
        }
    }

    pub fn mesh_base(&self) -> &NetMeshBaseIdentifier {
        &self.mesh_base
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn is_home(&self) -> bool {
        self.local_id.is_empty()
    }

    pub fn to_external_form(&self) -> String {
        format!("{}{}{}", self.mesh_base, SEPARATOR, self.local_id)
    }

    /// Parses `raw`, resolving relative forms against `context`.
    pub fn from_external_form(
        context: Option<&NetMeshBaseIdentifier>,
        raw: &str,
    ) -> Result<Self, IdentifierError> {
        Self::parse(context, raw, false)
    }

    /// Like [`Self::from_external_form`] but guesses the mesh base part leniently.
    pub fn guess_from_external_form(
        context: Option<&NetMeshBaseIdentifier>,
        raw: &str,
    ) -> Result<Self, IdentifierError> {
        Self::parse(context, raw, true)
    }

    fn parse(
        context: Option<&NetMeshBaseIdentifier>,
        raw: &str,
        guess: bool,
    ) -> Result<Self, IdentifierError> {
        let raw = raw.trim();
        let base = |s: &str| {
            if guess {
                NetMeshBaseIdentifier::guess_from_external_form(s)
            } else {
                NetMeshBaseIdentifier::from_external_form(s)
            }
        };
        let with_context = |local: &str| match context {
            Some(ctx) => Self::new(ctx.clone(), local),
            None => Err(IdentifierError::MissingContext(raw.to_string())),
        };

        if raw.is_empty() {
            return with_context("");
        }
        match raw.find(SEPARATOR) {
            Some(0) => with_context(&raw[1..]),
            Some(hash) => Self::new(base(&raw[..hash])?, &raw[hash + 1..]),
            None if treat_as_global(raw) => Ok(Self::home(base(raw)?)),
            None => with_context(raw),
        }
    }
}

/// A string that would be mistaken for a global identifier.
fn treat_as_global(raw: &str) -> bool {
    raw.contains('.')
        || raw.contains("localhost")
        || NetMeshBaseIdentifier::from_external_form(raw).is_ok()
}

fn check_local_id(local_id: &str) -> Result<(), IdentifierError> {
    if local_id.is_empty() {
        return Ok(());
    }
    for disallowed in DISALLOWED_LOCAL_ID_STRINGS {
        if local_id.contains(disallowed) {
            return Err(IdentifierError::DisallowedSubstring {
                raw: local_id.to_string(),
                found: disallowed.to_string(),
            });
        }
    }
    if treat_as_global(local_id) {
        return Err(IdentifierError::LocalIdIsGlobal(local_id.to_string()));
    }
    Ok(())
}

impl fmt::Display for NetMeshObjectIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.mesh_base, SEPARATOR, self.local_id)
    }
}

impl FromStr for NetMeshObjectIdentifier {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_external_form(None, s)
    }
}

impl TryFrom<String> for NetMeshObjectIdentifier {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NetMeshObjectIdentifier> for String {
    fn from(value: NetMeshObjectIdentifier) -> Self {
        value.to_external_form()
    }
}

// ============================================================================
// FACTORY
// ============================================================================

/// Creates identifiers for objects owned by one mesh base.
#[derive(Debug, Clone)]
pub struct NetMeshObjectIdentifierFactory {
    mesh_base: NetMeshBaseIdentifier,
}

impl NetMeshObjectIdentifierFactory {
    pub fn new(mesh_base: NetMeshBaseIdentifier) -> Self {
        Self { mesh_base }
    }

    pub fn mesh_base(&self) -> &NetMeshBaseIdentifier {
        &self.mesh_base
    }

    /// Fresh, unique identifier in this mesh base.
    pub fn create_identifier(&self) -> NetMeshObjectIdentifier {
        NetMeshObjectIdentifier {
            mesh_base: self.mesh_base.clone(),
            local_id: uuid::Uuid::new_v4().simple().to_string(),
        }
    }

    pub fn create_identifier_from(&self, local_id: &str) -> Result<NetMeshObjectIdentifier, IdentifierError> {
        NetMeshObjectIdentifier::new(self.mesh_base.clone(), local_id)
    }

    pub fn home_object_identifier(&self) -> NetMeshObjectIdentifier {
        NetMeshObjectIdentifier::home(self.mesh_base.clone())
    }

    pub fn from_external_form(&self, raw: &str) -> Result<NetMeshObjectIdentifier, IdentifierError> {
        NetMeshObjectIdentifier::from_external_form(Some(&self.mesh_base), raw)
    }

    pub fn guess_from_external_form(&self, raw: &str) -> Result<NetMeshObjectIdentifier, IdentifierError> {
        NetMeshObjectIdentifier::guess_from_external_form(Some(&self.mesh_base), raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn base(raw: &str) -> NetMeshBaseIdentifier {
        NetMeshBaseIdentifier::from_external_form(raw).unwrap()
    }

    #[test]
    fn test_mesh_base_identifier_forms() {
        assert!(NetMeshBaseIdentifier::from_external_form("http://example.com/").is_ok());
        assert!(NetMeshBaseIdentifier::from_external_form("tcp://127.0.0.1:7420").is_ok());
        assert!(NetMeshBaseIdentifier::from_external_form("=alice").is_ok());
        assert!(NetMeshBaseIdentifier::from_external_form("example.com").is_err());
        assert!(NetMeshBaseIdentifier::from_external_form("http://a.com/#x").is_err());
        assert!(NetMeshBaseIdentifier::from_external_form("1http://a.com/").is_err());
        assert_eq!(
            NetMeshBaseIdentifier::from_external_form("  "),
            Err(IdentifierError::Empty)
        );
    }

    #[test]
    fn test_guess_adds_scheme() {
        let guessed = NetMeshBaseIdentifier::guess_from_external_form("example.com").unwrap();
        assert_eq!(guessed.as_str(), "http://example.com/");
        assert_eq!(guessed.scheme(), Some("http"));
        assert_eq!(guessed.authority(), "example.com/");
    }

    #[test]
    fn test_home_object_external_form() {
        let home = NetMeshObjectIdentifier::home(base("http://example.com/"));
        assert!(home.is_home());
        assert_eq!(home.to_external_form(), "http://example.com/#");
        assert_eq!(home.to_external_form().parse::<NetMeshObjectIdentifier>().unwrap(), home);
    }

    #[test]
    fn test_relative_forms_use_context() {
        let ctx = base("http://example.com/");
        let factory = NetMeshObjectIdentifierFactory::new(ctx.clone());

        assert!(factory.from_external_form("").unwrap().is_home());
        let local = factory.from_external_form("#abc").unwrap();
        assert_eq!(local.mesh_base(), &ctx);
        assert_eq!(local.local_id(), "abc");
        assert_eq!(factory.from_external_form("abc").unwrap(), local);

        let other = factory.from_external_form("http://other.org/#xyz").unwrap();
        assert_eq!(other.mesh_base().as_str(), "http://other.org/");

        let global = factory.from_external_form("http://other.org/").unwrap();
        assert!(global.is_home());
        assert_eq!(global.mesh_base().as_str(), "http://other.org/");
    }

    #[test]
    fn test_relative_form_without_context_fails() {
        assert!(matches!(
            "#abc".parse::<NetMeshObjectIdentifier>(),
            Err(IdentifierError::MissingContext(_))
        ));
    }

    #[test]
    fn test_local_id_rejects_separator_and_globals() {
        let ctx = base("http://example.com/");
        assert!(matches!(
            NetMeshObjectIdentifier::new(ctx.clone(), "a#b"),
            Err(IdentifierError::DisallowedSubstring { .. })
        ));
        assert!(matches!(
            NetMeshObjectIdentifier::new(ctx.clone(), "a.b"),
            Err(IdentifierError::DisallowedSubstring { .. })
        ));
        assert!(matches!(
            NetMeshObjectIdentifier::new(ctx.clone(), "localhost"),
            Err(IdentifierError::LocalIdIsGlobal(_))
        ));
        assert!(matches!(
            NetMeshObjectIdentifier::new(ctx.clone(), "=xri"),
            Err(IdentifierError::LocalIdIsGlobal(_))
        ));
        assert!(NetMeshObjectIdentifier::new(ctx, "plain_id-1").is_ok());
    }

    #[test]
    fn test_factory_creates_unique_ids() {
        let factory = NetMeshObjectIdentifierFactory::new(base("http://example.com/"));
        let a = factory.create_identifier();
        let b = factory.create_identifier();
        assert_ne!(a, b);
        assert!(!a.is_home());
        assert_eq!(a.to_external_form().parse::<NetMeshObjectIdentifier>().unwrap(), a);
    }

    #[test]
    fn test_serde_uses_external_form() {
        let id = NetMeshObjectIdentifier::new(base("http://example.com/"), "abc").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"http://example.com/#abc\"");
        let back: NetMeshObjectIdentifier = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    proptest! {
        #[test]
        fn prop_external_form_round_trip(
            host in "[a-z]{1,10}",
            tld in "(com|org|net)",
            path in "[a-z0-9]{0,6}",
            local in "[a-zA-Z0-9_-]{0,16}",
        ) {
            prop_assume!(!local.contains("localhost"));
            let mb = NetMeshBaseIdentifier::from_external_form(&format!("http://{host}.{tld}/{path}")).unwrap();
            let id = NetMeshObjectIdentifier::new(mb, &local).unwrap();
            let parsed: NetMeshObjectIdentifier = id.to_external_form().parse().unwrap();
            prop_assert_eq!(parsed, id);
        }
    }
}
