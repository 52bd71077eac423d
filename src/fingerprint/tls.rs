//! TLS ClientHello fingerprint configuration.
//!
//! Cipher suites cover TLS 1.2 only; TLS 1.3 suites are fixed by BoringSSL.

use std::io::Read;
use std::os::raw::c_int;

use boring::ssl::{SslContextBuilder, SslVersion};
use boring_sys::{CRYPTO_BUFFER, SSL, SSL_CTX};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::{Error, Result};

/// Chrome TLS 1.2 cipher suites in wire order.
pub const CHROME_CIPHER_SUITES: &[&str] = &[
    "ECDHE-ECDSA-AES128-GCM-SHA256",
    "ECDHE-RSA-AES128-GCM-SHA256",
    "ECDHE-ECDSA-AES256-GCM-SHA384",
    "ECDHE-RSA-AES256-GCM-SHA384",
    "ECDHE-ECDSA-CHACHA20-POLY1305",
    "ECDHE-RSA-CHACHA20-POLY1305",
    "ECDHE-RSA-AES128-SHA",
    "ECDHE-RSA-AES256-SHA",
    "AES128-GCM-SHA256",
    "AES256-GCM-SHA384",
    "AES128-SHA",
    "AES256-SHA",
];

/// Firefox TLS 1.2 cipher suites in wire order.
pub const FIREFOX_CIPHER_SUITES: &[&str] = &[
    "ECDHE-ECDSA-AES128-GCM-SHA256",
    "ECDHE-RSA-AES128-GCM-SHA256",
    "ECDHE-ECDSA-CHACHA20-POLY1305",
    "ECDHE-RSA-CHACHA20-POLY1305",
    "ECDHE-ECDSA-AES256-GCM-SHA384",
    "ECDHE-RSA-AES256-GCM-SHA384",
    "ECDHE-ECDSA-AES256-SHA",
    "ECDHE-ECDSA-AES128-SHA",
    "ECDHE-RSA-AES128-SHA",
    "ECDHE-RSA-AES256-SHA",
    "AES128-GCM-SHA256",
    "AES256-GCM-SHA384",
    "AES128-SHA",
    "AES256-SHA",
];

/// Chrome signature algorithms.
pub const CHROME_SIGNATURE_ALGORITHMS: &[&str] = &[
    "ecdsa_secp256r1_sha256",
    "rsa_pss_rsae_sha256",
    "rsa_pkcs1_sha256",
    "ecdsa_secp384r1_sha384",
    "rsa_pss_rsae_sha384",
    "rsa_pkcs1_sha384",
    "rsa_pss_rsae_sha512",
    "rsa_pkcs1_sha512",
];

/// Firefox signature algorithms.
pub const FIREFOX_SIGNATURE_ALGORITHMS: &[&str] = &[
    "ecdsa_secp256r1_sha256",
    "ecdsa_secp384r1_sha384",
    "ecdsa_secp521r1_sha512",
    "rsa_pss_rsae_sha256",
    "rsa_pss_rsae_sha384",
    "rsa_pss_rsae_sha512",
    "rsa_pkcs1_sha256",
    "rsa_pkcs1_sha384",
    "rsa_pkcs1_sha512",
];

/// Chrome supported groups.
pub const CHROME_CURVES: &[&str] = &["X25519", "P-256", "P-384"];

/// Firefox supported groups.
pub const FIREFOX_CURVES: &[&str] = &["X25519", "P-256", "P-384", "P-521"];

/// Certificate compression algorithm advertised in `compress_certificate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CertCompression {
    /// No compression extension.
    #[default]
    None,
    /// Brotli (Chrome).
    Brotli,
}

/// TLS fingerprint configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFingerprint {
    /// TLS 1.2 cipher suites in order.
    pub cipher_list: Vec<&'static str>,
    /// Signature algorithms.
    pub sigalgs: Vec<&'static str>,
    /// Supported curves/groups.
    pub curves: Vec<&'static str>,
    /// Enable GREASE values.
    pub grease: bool,
    /// Shuffle extension order on every handshake.
    pub permute_extensions: bool,
    /// Certificate compression advertised to the server.
    pub cert_compression: CertCompression,
}

impl TlsFingerprint {
    /// Chrome-like hello: GREASE, permuted extensions, Brotli cert compression.
    pub fn chrome() -> Self {
        Self {
            cipher_list: CHROME_CIPHER_SUITES.to_vec(),
            sigalgs: CHROME_SIGNATURE_ALGORITHMS.to_vec(),
            curves: CHROME_CURVES.to_vec(),
            grease: true,
            permute_extensions: true,
            cert_compression: CertCompression::Brotli,
        }
    }

    /// Firefox-like hello: no GREASE, fixed extension order.
    pub fn firefox() -> Self {
        Self {
            cipher_list: FIREFOX_CIPHER_SUITES.to_vec(),
            sigalgs: FIREFOX_SIGNATURE_ALGORITHMS.to_vec(),
            curves: FIREFOX_CURVES.to_vec(),
            grease: false,
            permute_extensions: false,
            cert_compression: CertCompression::None,
        }
    }

    /// Draw a fresh hello from the browser templates.
    ///
    /// The AEAD head of the cipher list and the curve list are shuffled, the
    /// legacy CBC tail is kept or dropped, and certificate compression is a
    /// coin flip. GREASE is always on and extensions are always permuted.
    pub fn randomized<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut fp = if rng.gen_bool(0.5) {
            Self::chrome()
        } else {
            Self::firefox()
        };

        let aead = fp
            .cipher_list
            .iter()
            .take_while(|c| c.contains("GCM") || c.contains("CHACHA20"))
            .count();
        fp.cipher_list[..aead].shuffle(rng);
        if rng.gen_bool(0.5) {
            fp.cipher_list.retain(|c| !c.ends_with("-SHA"));
        }

        fp.curves.shuffle(rng);
        fp.grease = true;
        fp.permute_extensions = true;
        fp.cert_compression = if rng.gen_bool(0.5) {
            CertCompression::Brotli
        } else {
            CertCompression::None
        };
        fp
    }

    /// Apply this fingerprint to a BoringSSL context.
    ///
    /// `include_ciphers` is false for QUIC, where only TLS 1.3 suites apply.
    pub fn apply(&self, builder: &mut SslContextBuilder, include_ciphers: bool) -> Result<()> {
        if include_ciphers && !self.cipher_list.is_empty() {
            builder
                .set_cipher_list(&self.cipher_list.join(":"))
                .map_err(|e| Error::tls(format!("Failed to set cipher list: {}", e)))?;
        }

        if !self.curves.is_empty() {
            builder
                .set_curves_list(&self.curves.join(":"))
                .map_err(|e| Error::tls(format!("Failed to set curves: {}", e)))?;
        }

        if !self.sigalgs.is_empty() {
            builder
                .set_sigalgs_list(&self.sigalgs.join(":"))
                .map_err(|e| Error::tls(format!("Failed to set signature algorithms: {}", e)))?;
        }

        builder.set_grease_enabled(self.grease);
        builder.set_permute_extensions(self.permute_extensions);

        if self.cert_compression == CertCompression::Brotli {
            // SAFETY: the context pointer is live for the duration of the call and
            // the callback only reads `in_len` bytes from `in_`.
            let added = unsafe {
                boring_sys::SSL_CTX_add_cert_compression_alg(
                    builder.as_ptr() as *mut SSL_CTX,
                    boring_sys::TLSEXT_cert_compression_brotli as u16,
                    None,
                    Some(decompress_brotli_cert),
                )
            };
            if added != 1 {
                return Err(Error::tls("Failed to register Brotli certificate compression"));
            }
        }

        builder
            .set_min_proto_version(Some(SslVersion::TLS1_2))
            .map_err(|e| Error::tls(format!("Failed to set min TLS version: {}", e)))?;
        builder
            .set_max_proto_version(Some(SslVersion::TLS1_3))
            .map_err(|e| Error::tls(format!("Failed to set max TLS version: {}", e)))?;

        Ok(())
    }
}

/// Brotli certificate decompression callback for BoringSSL.
unsafe extern "C" fn decompress_brotli_cert(
    _ssl: *mut SSL,
    out: *mut *mut CRYPTO_BUFFER,
    uncompressed_len: usize,
    in_: *const u8,
    in_len: usize,
) -> c_int {
    let compressed = std::slice::from_raw_parts(in_, in_len);
    let Some(decompressed) = decompress_brotli(compressed, uncompressed_len) else {
        return 0;
    };

    // CRYPTO_BUFFER_new copies the data.
    let buffer = boring_sys::CRYPTO_BUFFER_new(
        decompressed.as_ptr(),
        decompressed.len(),
        std::ptr::null_mut(),
    );
    if buffer.is_null() {
        return 0;
    }
    *out = buffer;
    1
}

/// Decompress a certificate, reading at most one byte past the declared
/// length. Anything but an exact match is rejected.
fn decompress_brotli(compressed: &[u8], uncompressed_len: usize) -> Option<Vec<u8>> {
    let mut decompressed = Vec::with_capacity(uncompressed_len);
    brotli::Decompressor::new(compressed, 4096)
        .take(uncompressed_len as u64 + 1)
        .read_to_end(&mut decompressed)
        .ok()?;
    (decompressed.len() == uncompressed_len).then_some(decompressed)
}
