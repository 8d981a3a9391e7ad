//! RSA key pair persistence and ADB challenge signing.
//!
//! The debug bridge authenticates clients with a 2048-bit RSA key pair. The
//! private key is stored as PKCS#8 PEM; the companion `<path>.pub` file holds
//! the public key in Android's own wire format: the base64 of a fixed-layout
//! struct (word count, Montgomery `n0inv`, modulus, `R²` residue, exponent –
//! all little-endian) followed by a space and an owner tag. The device keeps
//! that exact blob in `/data/misc/adb/adb_keys` after the user accepts the
//! on-screen authorization dialog, so the bytes we write must match what we
//! later send in the `AUTH(RSAPUBLICKEY)` message byte for byte.
//!
//! Keys are immutable once loaded. Callers reload the pair on every reconnect
//! attempt so a rotated key file takes effect without a restart.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use thiserror::Error;
use tracing::info;

/// RSA modulus size in bytes for the 2048-bit keys ADB uses.
const MODULUS_SIZE: usize = 256;
/// Modulus size in 32-bit words, the first field of the public-key struct.
const MODULUS_WORDS: usize = MODULUS_SIZE / 4;
/// Owner tag appended to the public-key file, mirroring adb's `user@host`.
const KEY_TAG: &str = "tvstate@localhost";

/// Errors raised while loading, generating, or using the key pair.
#[derive(Debug, Error)]
pub enum AuthError {
    /// A file system error while reading or writing key material.
    #[error("key I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The private key file is not valid PKCS#8 PEM, or PEM encoding failed.
    #[error("private key PKCS#8 error: {0}")]
    Pkcs8(#[from] rsa::pkcs8::Error),

    /// RSA key generation failed.
    #[error("key generation failed: {0}")]
    KeyGen(#[source] rsa::Error),

    /// The RSA signing primitive rejected the challenge (wrong token size,
    /// key/modulus mismatch).
    #[error("challenge signing failed: {0}")]
    Signing(#[source] rsa::Error),

    /// The loaded key's modulus does not fit the Android public-key struct.
    #[error("unsupported modulus size: {0} bytes (expected at most {MODULUS_SIZE})")]
    UnsupportedKeySize(usize),
}

/// An RSA key pair ready for the ADB handshake.
///
/// `public_key_wire` is the exact byte content of the `.pub` file, suitable
/// for the `AUTH(RSAPUBLICKEY)` payload.
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub private_key: RsaPrivateKey,
    pub public_key_wire: Vec<u8>,
}

/// Loads the key pair at `path` (public half at `<path>.pub`), generating and
/// persisting a fresh 2048-bit pair if either file is missing.
///
/// The private key file is written with owner-only permissions on Unix.
///
/// # Errors
///
/// Returns [`AuthError`] for file-system failures, unparseable key material,
/// or key generation failure.
pub fn load_or_create_keypair(path: &Path) -> Result<KeyPair, AuthError> {
    let pub_path = public_key_path(path);

    if path.exists() && pub_path.exists() {
        let pem = std::fs::read_to_string(path).map_err(|source| AuthError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let private_key = RsaPrivateKey::from_pkcs8_pem(&pem)?;
        let public_key_wire = std::fs::read(&pub_path).map_err(|source| AuthError::Io {
            path: pub_path.clone(),
            source,
        })?;
        return Ok(KeyPair {
            private_key,
            public_key_wire,
        });
    }

    // Either half missing: regenerate both so they always agree.
    info!(path = %path.display(), "generating new ADB key pair");
    let mut rng = rand::thread_rng();
    let private_key = RsaPrivateKey::new(&mut rng, MODULUS_SIZE * 8).map_err(AuthError::KeyGen)?;
    let public_key_wire = encode_android_public_key(&private_key.to_public_key(), KEY_TAG)?;

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| AuthError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let pem = private_key.to_pkcs8_pem(LineEnding::LF)?;
    std::fs::write(path, pem.as_bytes()).map_err(|source| AuthError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    restrict_permissions(path)?;
    std::fs::write(&pub_path, &public_key_wire).map_err(|source| AuthError::Io {
        path: pub_path.clone(),
        source,
    })?;

    Ok(KeyPair {
        private_key,
        public_key_wire,
    })
}

/// Signs the device's 20-byte auth challenge.
///
/// ADB treats the raw token as a SHA-1 digest and expects a PKCS#1 v1.5
/// signature with the SHA-1 DigestInfo prefix; the token itself is never
/// hashed again on our side.
///
/// # Errors
///
/// Returns [`AuthError::Signing`] if the token length is wrong for the
/// padding scheme.
pub fn sign_token(keypair: &KeyPair, token: &[u8]) -> Result<Vec<u8>, AuthError> {
    keypair
        .private_key
        .sign(Pkcs1v15Sign::new::<Sha1>(), token)
        .map_err(AuthError::Signing)
}

/// Derives the public-key path: `<path>.pub`, preserving any existing
/// extension (`adbkey` → `adbkey.pub`).
pub fn public_key_path(private_path: &Path) -> PathBuf {
    let mut name = private_path.as_os_str().to_os_string();
    name.push(".pub");
    PathBuf::from(name)
}

/// Encodes an RSA public key into Android's key-file format.
///
/// Layout of the base64-wrapped struct (all fields little-endian):
/// ```text
/// [len_words:4][n0inv:4][modulus:256][rr:256][exponent:4]
/// ```
/// `n0inv` is `-n⁻¹ mod 2³²` and `rr` is `R² mod n` with `R = 2²⁰⁴⁸`; the
/// device precomputes nothing and uses these directly for Montgomery
/// multiplication.
fn encode_android_public_key(key: &RsaPublicKey, tag: &str) -> Result<Vec<u8>, AuthError> {
    let mut modulus = key.n().to_bytes_le();
    if modulus.len() > MODULUS_SIZE {
        return Err(AuthError::UnsupportedKeySize(modulus.len()));
    }
    modulus.resize(MODULUS_SIZE, 0);

    let n0 = u32::from_le_bytes([modulus[0], modulus[1], modulus[2], modulus[3]]);
    let n0inv = negative_inverse_mod_2_32(n0);

    let rr = (BigUint::from(1u8) << (MODULUS_SIZE * 8 * 2)) % key.n();
    let mut rr_bytes = rr.to_bytes_le();
    rr_bytes.resize(MODULUS_SIZE, 0);

    let mut exponent = key.e().to_bytes_le();
    exponent.resize(4, 0);

    let mut raw = Vec::with_capacity(8 + MODULUS_SIZE * 2 + 4);
    raw.extend_from_slice(&(MODULUS_WORDS as u32).to_le_bytes());
    raw.extend_from_slice(&n0inv.to_le_bytes());
    raw.extend_from_slice(&modulus);
    raw.extend_from_slice(&rr_bytes);
    raw.extend_from_slice(&exponent);

    let mut out = BASE64.encode(&raw).into_bytes();
    out.push(b' ');
    out.extend_from_slice(tag.as_bytes());
    Ok(out)
}

/// Computes `-n⁻¹ mod 2³²` for an odd `n` via Newton iteration.
///
/// Each step doubles the number of correct low bits, so five steps suffice
/// for 32 bits starting from the seed `n` (correct to 3 bits for odd `n`).
fn negative_inverse_mod_2_32(n: u32) -> u32 {
    let mut x = n;
    for _ in 0..5 {
        x = x.wrapping_mul(2u32.wrapping_sub(n.wrapping_mul(x)));
    }
    x.wrapping_neg()
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), AuthError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).map_err(|source| {
        AuthError::Io {
            path: path.to_path_buf(),
            source,
        }
    })
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), AuthError> {
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_key_path() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("tvstate_keys_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join("adbkey")
    }

    #[test]
    fn test_public_key_path_appends_pub_suffix() {
        assert_eq!(
            public_key_path(Path::new("/tmp/adbkey")),
            PathBuf::from("/tmp/adbkey.pub")
        );
        // An existing extension is kept, matching adb's `adbkey.bin.pub`.
        assert_eq!(
            public_key_path(Path::new("/tmp/adbkey.bin")),
            PathBuf::from("/tmp/adbkey.bin.pub")
        );
    }

    #[test]
    fn test_negative_inverse_mod_2_32_satisfies_identity() {
        // For any odd n, n * (-n⁻¹) ≡ -1 (mod 2³²).
        for n in [1u32, 3, 0x10001, 0xDEAD_BEEF | 1, u32::MAX] {
            let inv = negative_inverse_mod_2_32(n);
            assert_eq!(n.wrapping_mul(inv), u32::MAX, "failed for n = {n:#x}");
        }
    }

    #[test]
    fn test_generate_load_and_sign_round_trip() {
        let path = temp_key_path();
        let _ = std::fs::remove_file(&path);
        let _ = std::fs::remove_file(public_key_path(&path));

        // First call generates and persists both halves.
        let generated = load_or_create_keypair(&path).expect("generate");
        assert!(path.exists(), "private key file must be written");
        assert!(public_key_path(&path).exists(), "public key file must be written");

        // Second call loads the same key back.
        let loaded = load_or_create_keypair(&path).expect("load");
        assert_eq!(
            generated.private_key.to_public_key(),
            loaded.private_key.to_public_key(),
            "reload must yield the same key"
        );
        assert_eq!(generated.public_key_wire, loaded.public_key_wire);

        // PKCS#1 v1.5 signatures are deterministic: same token, same bytes.
        let token = [0x42u8; 20];
        let sig_a = sign_token(&loaded, &token).expect("sign");
        let sig_b = sign_token(&loaded, &token).expect("sign again");
        assert_eq!(sig_a, sig_b);
        assert_eq!(sig_a.len(), MODULUS_SIZE, "signature is one modulus wide");

        std::fs::remove_file(&path).ok();
        std::fs::remove_file(public_key_path(&path)).ok();
    }

    #[test]
    fn test_android_public_key_format_structure() {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 2048).expect("keygen");
        let wire = encode_android_public_key(&private_key.to_public_key(), "tester@host")
            .expect("encode");

        let text = String::from_utf8(wire).expect("ascii");
        let (b64, tag) = text.split_once(' ').expect("space before tag");
        assert_eq!(tag, "tester@host");

        let raw = BASE64.decode(b64).expect("valid base64");
        // 4 (len) + 4 (n0inv) + 256 (modulus) + 256 (rr) + 4 (exponent)
        assert_eq!(raw.len(), 524);

        let len_words = u32::from_le_bytes(raw[0..4].try_into().unwrap());
        assert_eq!(len_words as usize, MODULUS_WORDS);

        // n0inv must invert the low modulus word.
        let n0inv = u32::from_le_bytes(raw[4..8].try_into().unwrap());
        let n0 = u32::from_le_bytes(raw[8..12].try_into().unwrap());
        assert_eq!(n0.wrapping_mul(n0inv), u32::MAX);

        let exponent = u32::from_le_bytes(raw[520..524].try_into().unwrap());
        assert_eq!(exponent, 65537);
    }
}
