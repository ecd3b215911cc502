//! Typed decode/encode option records.
//!
//! Options are passed as an open list; the core classifies the list once
//! per call and rejects it outright when two records of the same kind are
//! present. Defaults when nothing is supplied: decode the image body,
//! defer metadata decode, no resource limits, no damage tolerance, no
//! transform application.

use crate::cancel::CancelToken;
use crate::error::{Error, Result};

/// How deeply one class of data should be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeDepth {
    /// Whatever is appropriate for the data class.
    #[default]
    Default,
    /// Do not decode at all.
    Skip,
    /// Retain raw bytes, decode on first access.
    Defer,
    /// Decode while the file is read.
    Decode,
}

/// Controls image-body and metadata decode depth.
///
/// Image bodies cannot currently be deferred; requesting `Defer` for the
/// body is a configuration error.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecodeDepthOptions {
    pub image: DecodeDepth,
    pub metadata: DecodeDepth,
}

/// Byte budgets enforced while records are walked. A record whose declared
/// length exceeds the remaining budget is rejected before its payload is
/// read.
#[derive(Debug, Clone, Copy, Default)]
pub struct LimitOptions {
    pub max_image_bytes: Option<u64>,
    pub max_metadata_bytes: Option<u64>,
}

/// Damage-tolerant decoding switches. Only for explicitly reading
/// known-damaged files; not for normal use.
#[derive(Debug, Clone, Copy, Default)]
pub struct DamageOptions {
    /// Data after the container's end marker is not an error.
    pub allow_trailing_data: bool,
    /// Records with format or integrity problems are skipped, not fatal.
    pub skip_damaged: bool,
    /// Out-of-order records are accepted where the format allows it.
    pub allow_misordered: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransformMode {
    #[default]
    None,
    /// Apply the metadata-described transform to the decoded pixels.
    Forward,
    /// Undo a transform that is already baked into the pixels.
    Reverse,
}

/// Per-axis application of transforms described by metadata (for example
/// a camera orientation tag).
#[derive(Debug, Clone, Copy, Default)]
pub struct TransformOptions {
    pub rotation: TransformMode,
    pub color: TransformMode,
    pub gamma: TransformMode,
}

/// One read-side option record.
#[derive(Debug, Clone)]
pub enum ReadOption {
    Decode(DecodeDepthOptions),
    Limits(LimitOptions),
    Damage(DamageOptions),
    Transform(TransformOptions),
    Cancel(CancelToken),
}

/// One write-side option record.
#[derive(Debug, Clone)]
pub enum WriteOption {
    /// Carries metadata to be written alongside the image body.
    Metadata(crate::registry::Metadata),
}

// ── Resolution ───────────────────────────────────────────────────────────────

/// The option list flattened into one struct, after duplicate-kind
/// rejection and default filling.
#[derive(Debug, Clone, Default)]
pub struct ResolvedOptions {
    pub image: DecodeDepth,
    pub metadata: DecodeDepth,
    pub limits: LimitOptions,
    pub damage: DamageOptions,
    pub transform: TransformOptions,
    pub cancel: Option<CancelToken>,
}

impl ResolvedOptions {
    pub fn from_list(opts: &[ReadOption]) -> Result<Self> {
        let mut depth: Option<DecodeDepthOptions> = None;
        let mut limits: Option<LimitOptions> = None;
        let mut damage: Option<DamageOptions> = None;
        let mut transform: Option<TransformOptions> = None;
        let mut cancel: Option<CancelToken> = None;

        for opt in opts {
            match opt {
                ReadOption::Decode(o) => set_once(&mut depth, *o, "decode depth")?,
                ReadOption::Limits(o) => set_once(&mut limits, *o, "limits")?,
                ReadOption::Damage(o) => set_once(&mut damage, *o, "damage handling")?,
                ReadOption::Transform(o) => set_once(&mut transform, *o, "transform")?,
                ReadOption::Cancel(t) => set_once(&mut cancel, t.clone(), "cancellation")?,
            }
        }

        let depth = depth.unwrap_or_default();
        if depth.image == DecodeDepth::Defer {
            return Err(Error::Option(
                "image body decoding cannot be deferred".into(),
            ));
        }

        Ok(Self {
            image: depth.image,
            metadata: depth.metadata,
            limits: limits.unwrap_or_default(),
            damage: damage.unwrap_or_default(),
            transform: transform.unwrap_or_default(),
            cancel,
        })
    }

    /// Whether the image body should be materialized during the decode
    /// call. At the default depth the verbatim records are retained and
    /// pixels materialize on first access instead.
    pub fn decode_image(&self) -> bool {
        self.image == DecodeDepth::Decode
    }

    /// Whether every deferred metadata field should be forced right after
    /// the walk completes.
    pub fn decode_metadata_eagerly(&self) -> bool {
        self.metadata == DecodeDepth::Decode
    }

    /// Whether metadata records should be captured at all.
    pub fn keep_metadata(&self) -> bool {
        self.metadata != DecodeDepth::Skip
    }

    pub fn check_cancelled(&self) -> Result<()> {
        match &self.cancel {
            Some(t) if t.cancelled() => Err(Error::Cancelled),
            _ => Ok(()),
        }
    }

    pub fn image_budget(&self) -> Budget {
        Budget::new("image data", self.limits.max_image_bytes)
    }

    pub fn metadata_budget(&self) -> Budget {
        Budget::new("metadata", self.limits.max_metadata_bytes)
    }
}

fn set_once<T>(slot: &mut Option<T>, value: T, kind: &str) -> Result<()> {
    if slot.is_some() {
        return Err(Error::Option(format!("duplicate {kind} option record")));
    }
    *slot = Some(value);
    Ok(())
}

// ── Budget ───────────────────────────────────────────────────────────────────

/// Incrementally charged byte budget. Charging is done from declared record
/// lengths, before the payload is read, so an oversized record never pulls
/// a byte off the stream.
#[derive(Debug, Clone)]
pub struct Budget {
    what: &'static str,
    remaining: Option<u64>,
}

impl Budget {
    pub fn new(what: &'static str, limit: Option<u64>) -> Self {
        Self {
            what,
            remaining: limit,
        }
    }

    pub fn charge(&mut self, declared: u64) -> Result<()> {
        let Some(remaining) = self.remaining else {
            return Ok(());
        };
        if declared > remaining {
            return Err(Error::ResourceLimit {
                what: self.what,
                declared,
                remaining,
            });
        }
        self.remaining = Some(remaining - declared);
        Ok(())
    }
}
