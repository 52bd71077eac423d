//! ClientHello presets selectable per transport.

use super::tls::TlsFingerprint;

/// Which ClientHello a TLS connection presents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientHello {
    /// Fresh randomized hello per connection, with ALPN.
    #[default]
    Randomized,
    /// Fresh randomized hello per connection, without the ALPN extension.
    RandomizedNoAlpn,
    /// Fixed Chrome-like hello.
    Chrome,
    /// Fixed Firefox-like hello.
    Firefox,
    /// BoringSSL defaults, no fingerprinting.
    Native,
}

impl ClientHello {
    /// Resolve the fingerprint for one handshake; `None` means BoringSSL defaults.
    pub fn tls_fingerprint(&self) -> Option<TlsFingerprint> {
        match self {
            Self::Randomized | Self::RandomizedNoAlpn => {
                Some(TlsFingerprint::randomized(&mut rand::thread_rng()))
            }
            Self::Chrome => Some(TlsFingerprint::chrome()),
            Self::Firefox => Some(TlsFingerprint::firefox()),
            Self::Native => None,
        }
    }

    /// Whether the hello carries an ALPN extension.
    pub fn sends_alpn(&self) -> bool {
        !matches!(self, Self::RandomizedNoAlpn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alpn_presence() {
        assert!(ClientHello::Randomized.sends_alpn());
        assert!(!ClientHello::RandomizedNoAlpn.sends_alpn());
        assert!(ClientHello::Native.sends_alpn());
    }

    #[test]
    fn test_native_has_no_fingerprint() {
        assert!(ClientHello::Native.tls_fingerprint().is_none());
        assert_eq!(ClientHello::Chrome.tls_fingerprint(), Some(TlsFingerprint::chrome()));
    }
}
