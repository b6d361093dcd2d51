/// Errors surfaced by the primitive layer: malformed tap masks, non-coprime
/// tap selections, and Diffie-Hellman parameter violations.
pub enum CryptoError {
    /// A tap index or mask word used a bit position >= 31, which the packed
    /// encoding cannot represent.
    TapOutOfRange,

    /// Two tap positions within the same mask were identical.
    DuplicateTap,

    /// All tap positions shared a common divisor with 32, so the resulting
    /// LFSR would cycle through a reduced state space.
    NonCoprimeTaps,

    /// The Diffie-Hellman generator was not smaller than the modulus.
    GeneratorExceedsModulus,
}

impl std::fmt::Display for CryptoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TapOutOfRange => f.write_str("TapOutOfRange"),
            Self::DuplicateTap => f.write_str("DuplicateTap"),
            Self::NonCoprimeTaps => f.write_str("NonCoprimeTaps"),
            Self::GeneratorExceedsModulus => f.write_str("GeneratorExceedsModulus"),
        }
    }
}

impl std::fmt::Debug for CryptoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

impl std::error::Error for CryptoError {}
