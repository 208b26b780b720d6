//! Capability-token sessions backed by filesystem directories.
//!
//! A session token is a pair of alphanumeric components: an 11-character
//! public part and a 31-character secret. On the wire the pair travels as
//! 44 bytes, each component NUL-terminated in a fixed-width field. Holding
//! both components *is* the capability: the store maps them onto a nested
//! directory pair `<root>/<public>/<secret>` (mode 0700), and opening a
//! session is nothing more than proving that path exists.
//!
//! Both components are validated to be exactly their fixed length and ASCII
//! alphanumeric before they are ever joined into a path, so a token can
//! never smuggle `/`, `..`, or NUL into the filesystem layer.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rand::rngs::{OsRng, StdRng};
use rand::{Rng, RngCore, SeedableRng};
use thiserror::Error;
use tracing::{debug, warn};

/// Length of the public token component, in characters.
pub const PUBLIC_LEN: usize = 11;
/// Length of the secret token component, in characters.
pub const SECRET_LEN: usize = 31;
/// Wire size of a full token: both components NUL-terminated.
pub const TOKEN_WIRE_LEN: usize = (PUBLIC_LEN + 1) + (SECRET_LEN + 1);

/// Alphabet the token generator samples from.
const ALPHABET: &[u8] = b"NichL4ngSnack3nK0ppInnNacken";

/// Mixed into the raw seed bytes before folding. The trailing NUL is part
/// of the cycle.
const SEED_XOR: [u8; 8] = *b"Buddels\0";

/// Entropy drawn from the OS per generated component.
const SEED_BYTES: usize = 19;

#[derive(Debug, Error)]
pub enum SessionError {
    /// A token component has the wrong length or a non-alphanumeric byte.
    #[error("malformed session token")]
    InvalidToken,

    /// The token is well-formed but no session directory matches it.
    #[error("no such session")]
    NotFound,

    #[error("session directory I/O error: {0}")]
    Io(#[from] io::Error),
}

// ── Token ─────────────────────────────────────────────────────────────────────

/// A full session capability: public component plus secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken {
    public: String,
    secret: String,
}

impl SessionToken {
    /// Builds a token from its two components, validating both.
    pub fn from_parts(public: &str, secret: &str) -> Result<Self, SessionError> {
        validate_component(public, PUBLIC_LEN)?;
        validate_component(secret, SECRET_LEN)?;
        Ok(Self {
            public: public.to_owned(),
            secret: secret.to_owned(),
        })
    }

    /// Parses the 44-byte wire form: a 12-byte NUL-terminated public field
    /// followed by a 32-byte NUL-terminated secret field. Each component
    /// must fill its field exactly.
    pub fn from_wire(bytes: &[u8]) -> Result<Self, SessionError> {
        if bytes.len() != TOKEN_WIRE_LEN {
            return Err(SessionError::InvalidToken);
        }
        let public = field_str(&bytes[..PUBLIC_LEN + 1])?;
        let secret = field_str(&bytes[PUBLIC_LEN + 1..])?;
        Self::from_parts(public, secret)
    }

    /// Serializes the token into its 44-byte wire form.
    pub fn to_wire(&self) -> [u8; TOKEN_WIRE_LEN] {
        let mut wire = [0u8; TOKEN_WIRE_LEN];
        wire[..PUBLIC_LEN].copy_from_slice(self.public.as_bytes());
        wire[PUBLIC_LEN + 1..PUBLIC_LEN + 1 + SECRET_LEN].copy_from_slice(self.secret.as_bytes());
        wire
    }

    pub fn public(&self) -> &str {
        &self.public
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

/// Extracts the string of a fixed-width NUL-terminated field. The NUL must
/// sit exactly at the last byte; an early NUL means a short component.
fn field_str(field: &[u8]) -> Result<&str, SessionError> {
    let (last, body) = field.split_last().ok_or(SessionError::InvalidToken)?;
    if *last != 0 || body.contains(&0) {
        return Err(SessionError::InvalidToken);
    }
    std::str::from_utf8(body).map_err(|_| SessionError::InvalidToken)
}

fn validate_component(component: &str, expected_len: usize) -> Result<(), SessionError> {
    if component.len() != expected_len
        || !component.bytes().all(|b| b.is_ascii_alphanumeric())
    {
        return Err(SessionError::InvalidToken);
    }
    Ok(())
}

// ── Generator ─────────────────────────────────────────────────────────────────

/// Folds raw seed bytes into one word: each byte is XORed against the fixed
/// constant (cycled), widened, shifted to a position-dependent byte lane,
/// and XOR-accumulated.
fn fold_seed(seed: &[u8]) -> u64 {
    seed.iter().enumerate().fold(0u64, |acc, (i, &b)| {
        let mixed = b ^ SEED_XOR[i % SEED_XOR.len()];
        acc ^ (u64::from(mixed) << (8 * (i % 8)))
    })
}

/// Samples `len` characters from the fixed alphabet, seeded by folding
/// `seed`.
fn gen_component(seed: &[u8], len: usize) -> String {
    let mut rng = StdRng::seed_from_u64(fold_seed(seed));
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Generates a fresh token: the public component from OS entropy, the
/// secret re-seeded from the public component's wire field so the pair is
/// bound together.
fn generate_token() -> SessionToken {
    let mut seed = [0u8; SEED_BYTES];
    OsRng.fill_bytes(&mut seed);
    let public = gen_component(&seed, PUBLIC_LEN);

    let mut public_field = [0u8; PUBLIC_LEN + 1];
    public_field[..PUBLIC_LEN].copy_from_slice(public.as_bytes());
    let secret = gen_component(&public_field, SECRET_LEN);

    SessionToken { public, secret }
}

// ── Store ─────────────────────────────────────────────────────────────────────

/// A proven capability: the secret directory of an open session. All file
/// operations of the session happen inside this path.
#[derive(Debug)]
pub struct CapabilityHandle {
    path: PathBuf,
}

impl CapabilityHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Creates and re-opens sessions under a data root directory.
#[derive(Debug)]
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    /// The data root must already exist; the store never creates it.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates a fresh session: generates a token and materializes its
    /// directory pair. A public-component collision triggers a retry with
    /// fresh OS entropy. If the secret directory cannot be created the
    /// public one is rolled back so no half-built session remains.
    pub fn create(&self) -> Result<(SessionToken, CapabilityHandle), SessionError> {
        loop {
            let token = generate_token();
            let public_dir = self.root.join(token.public());

            match create_session_dir(&public_dir) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    debug!(public = %token.public(), "token collision, regenerating");
                    continue;
                }
                Err(e) => return Err(SessionError::Io(e)),
            }

            let secret_dir = public_dir.join(token.secret());
            if let Err(e) = create_session_dir(&secret_dir) {
                if let Err(rb) = fs::remove_dir(&public_dir) {
                    warn!(error = %rb, "failed to roll back public session directory");
                }
                return Err(SessionError::Io(e));
            }

            return Ok((token, CapabilityHandle { path: secret_dir }));
        }
    }

    /// Proves a token: both components must be well-formed and their
    /// directory pair must exist.
    pub fn open(&self, token: &SessionToken) -> Result<CapabilityHandle, SessionError> {
        validate_component(token.public(), PUBLIC_LEN)?;
        validate_component(token.secret(), SECRET_LEN)?;

        let path = self.root.join(token.public()).join(token.secret());
        match fs::metadata(&path) {
            Ok(meta) if meta.is_dir() => Ok(CapabilityHandle { path }),
            Ok(_) => Err(SessionError::NotFound),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(SessionError::NotFound),
            Err(e) => Err(SessionError::Io(e)),
        }
    }
}

#[cfg(unix)]
fn create_session_dir(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().mode(0o700).create(path)
}

#[cfg(not(unix))]
fn create_session_dir(path: &Path) -> io::Result<()> {
    fs::DirBuilder::new().create(path)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
