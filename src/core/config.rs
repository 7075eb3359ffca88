//! Process configuration, per-call descriptors, and the burble log.
//!
//! `init` / `finalize` must be paired. The configuration set at init is
//! read-only afterwards; per-primitive overrides travel in the
//! [`Descriptor`] instead of mutating global state.
//!
//! The "burble" is a human-readable diagnostic stream of the decisions
//! the engine makes (method selection, format transitions, deferred-work
//! resolution). It is emitted through the `log` facade at debug level, so
//! whatever logger the host application installs receives it.

use serde::{Deserialize, Serialize};
use std::sync::RwLock;

use crate::error::{Error, Result};

/// Fraction of non-empty vectors at or below which a matrix is stored
/// hypersparse, unless overridden per matrix.
pub const DEFAULT_HYPER_SWITCH: f64 = 0.0625;

/// Density at or above which a matrix is stored as a bitmap, unless
/// overridden per matrix.
pub const DEFAULT_BITMAP_SWITCH: f64 = 0.6;

/// Entries of work one task should own, roughly. The slicer targets
/// `32 × threads` tasks but never slices finer than this.
pub(crate) const CHUNK: usize = 4096;

// ============================================================================
// PROCESS CONFIGURATION
// ============================================================================

/// Whether primitives finalize their output before returning.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// Every primitive leaves its output finalized (no deferred work).
    Blocking,
    /// Deferred work (zombies, pending tuples) is resolved only when an
    /// observer forces it.
    NonBlocking,
}

/// Process-wide configuration, fixed at [`init`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub mode: Mode,
    /// Worker threads per primitive; 0 means use the rayon pool size.
    pub nthreads: usize,
    /// Emit the burble diagnostic stream through `log`.
    pub burble: bool,
    /// Default hypersparse threshold for new matrices.
    pub hyper_switch: f64,
    /// Default bitmap threshold for new matrices.
    pub bitmap_switch: f64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            mode: Mode::NonBlocking,
            nthreads: 0,
            burble: false,
            hyper_switch: DEFAULT_HYPER_SWITCH,
            bitmap_switch: DEFAULT_BITMAP_SWITCH,
        }
    }
}

static CONTEXT: RwLock<Option<Config>> = RwLock::new(None);

/// Initialize the engine. Must be called once before any other
/// operation, and paired with [`finalize`].
pub fn init(config: Config) -> Result<()> {
    if !(0.0..=1.0).contains(&config.hyper_switch)
        || !(0.0..=1.0).contains(&config.bitmap_switch)
    {
        return Err(Error::InvalidValue {
            what: "format switches must be fractions in [0, 1]".into(),
        });
    }
    let mut ctx = CONTEXT.write().unwrap();
    if ctx.is_some() {
        return Err(Error::InvalidValue {
            what: "init called twice without finalize".into(),
        });
    }
    *ctx = Some(config);
    Ok(())
}

/// Tear the engine down. Descriptors and matrices created before this
/// call must not be used afterwards.
pub fn finalize() -> Result<()> {
    let mut ctx = CONTEXT.write().unwrap();
    if ctx.is_none() {
        return Err(Error::Uninitialized);
    }
    *ctx = None;
    Ok(())
}

/// Snapshot of the process configuration.
pub(crate) fn context() -> Result<Config> {
    CONTEXT.read().unwrap().ok_or(Error::Uninitialized)
}

/// Worker threads a primitive should use.
pub(crate) fn effective_threads() -> usize {
    match context() {
        Ok(cfg) if cfg.nthreads > 0 => cfg.nthreads,
        _ => rayon::current_num_threads(),
    }
}

/// True when the burble stream is on.
pub(crate) fn burble_enabled() -> bool {
    matches!(context(), Ok(cfg) if cfg.burble)
}

/// True in blocking mode.
pub(crate) fn blocking_mode() -> bool {
    matches!(context(), Ok(cfg) if cfg.mode == Mode::Blocking)
}

macro_rules! burble {
    ($($arg:tt)*) => {
        if $crate::config::burble_enabled() {
            log::debug!($($arg)*);
        }
    };
}
pub(crate) use burble;

// ============================================================================
// DESCRIPTORS
// ============================================================================

/// Which multiply strategy the mxm engine should use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AxbMethod {
    /// Let the cost model decide.
    #[default]
    Default,
    Gustavson,
    Heap,
    Dot,
}

/// Per-call options. A value type: cheap to copy, serializable, and
/// immutable from the engine's point of view.
///
/// # Examples
///
/// ```
/// use sparsering::Descriptor;
///
/// let desc = Descriptor {
///     mask_comp: true,
///     output_replace: true,
///     ..Descriptor::default()
/// };
/// assert!(!desc.input0_transpose);
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    /// Clear entries of the output not written under the mask.
    pub output_replace: bool,
    /// Complement the mask.
    pub mask_comp: bool,
    /// Use only the mask's pattern, ignoring stored values.
    pub mask_struct: bool,
    /// Transpose the first input.
    pub input0_transpose: bool,
    /// Transpose the second input.
    pub input1_transpose: bool,
    /// Multiply strategy override.
    pub axb_method: AxbMethod,
    /// Force the output to be finalized and sorted on return. Primitives
    /// here always return finalized outputs, so the flag is accepted and
    /// trivially honored.
    pub sort: bool,
}

impl Descriptor {
    /// The all-defaults descriptor.
    pub fn new() -> Descriptor {
        Descriptor::default()
    }

    /// Descriptor with both transpose flags set, the common form for
    /// `C = A'*B'` expressions.
    pub fn t0t1() -> Descriptor {
        Descriptor {
            input0_transpose: true,
            input1_transpose: true,
            ..Descriptor::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_defaults() {
        let d = Descriptor::new();
        assert!(!d.output_replace);
        assert!(!d.mask_comp);
        assert!(!d.mask_struct);
        assert_eq!(d.axb_method, AxbMethod::Default);
    }

    #[test]
    fn test_descriptor_serde_round_trip() {
        let d = Descriptor {
            mask_struct: true,
            axb_method: AxbMethod::Dot,
            ..Descriptor::default()
        };
        let json = serde_json::to_string(&d).unwrap();
        let back: Descriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(d, back);
    }

    #[test]
    fn test_config_validation() {
        let bad = Config {
            hyper_switch: 1.5,
            ..Config::default()
        };
        assert_eq!(
            init(bad),
            Err(Error::InvalidValue {
                what: "format switches must be fractions in [0, 1]".into()
            })
        );
    }
}
