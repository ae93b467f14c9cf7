//! Payload codecs keyed by format

use super::format::{detect_format, Format};
use super::loader::{decode_kiln, LoadedModule};
use super::{ExtraFiles, SerializeError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

/// Decoder for one payload format
///
/// Arguments are the payload, the map auxiliary files are merged into, and
/// an optional cap on the accepted bytecode version.
pub type DecodeFn =
    fn(&[u8], &mut ExtraFiles, Option<u32>) -> Result<LoadedModule, SerializeError>;

/// A registered payload codec
#[derive(Debug, Clone, Copy)]
pub struct Codec {
    /// Format this codec reads
    pub format: Format,
    /// Decoder
    pub decode: DecodeFn,
}

/// Process-wide table of payload codecs
#[derive(Debug)]
pub struct CodecRegistry {
    codecs: Vec<Codec>,
}

static CODECS: OnceLock<CodecRegistry> = OnceLock::new();
static CODEC_REGISTRATIONS: AtomicUsize = AtomicUsize::new(0);

/// Build the codec table if needed and return it
///
/// Safe to call from any thread; codecs are registered exactly once.
pub fn ensure_codecs_registered() -> &'static CodecRegistry {
    CODECS.get_or_init(|| {
        CODEC_REGISTRATIONS.fetch_add(1, Ordering::SeqCst);
        let registry = CodecRegistry::builtin();
        tracing::debug!(
            target: "kiln::serialize",
            codecs = registry.codecs.len(),
            "Registered payload codecs"
        );
        registry
    })
}

/// Number of times the codec table has been built (at most one)
pub fn codec_registration_count() -> usize {
    CODEC_REGISTRATIONS.load(Ordering::SeqCst)
}

impl CodecRegistry {
    fn builtin() -> Self {
        Self {
            codecs: vec![Codec {
                format: Format::Kiln,
                decode: decode_kiln,
            }],
        }
    }

    /// Codec for `format`, if one is registered
    pub fn get(&self, format: Format) -> Option<&Codec> {
        self.codecs.iter().find(|codec| codec.format == format)
    }

    /// Registered formats
    pub fn formats(&self) -> impl Iterator<Item = Format> + '_ {
        self.codecs.iter().map(|codec| codec.format)
    }

    /// Detect the payload's format and decode it with the matching codec
    pub fn decode(
        &self,
        bytes: &[u8],
        extra_files: &mut ExtraFiles,
        max_version: Option<u32>,
    ) -> Result<LoadedModule, SerializeError> {
        let format = detect_format(bytes);
        let codec = self.get(format).ok_or_else(|| {
            SerializeError::Malformed(format!(
                "expected a kiln module, found {}",
                format.name()
            ))
        })?;
        (codec.decode)(bytes, extra_files, max_version)
    }
}
