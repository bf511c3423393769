/*!
 * Versioned Cell
 *
 * A (value, version) pair packed into one 64-bit word: value in the low half, version in the high
 * half. Packing keeps composite CAS a single native instruction instead of falling back to lock
 * striping, at the cost of 32-bit fields. The version wraps after 2^32 updates.
 */

use super::cell::AtomicCell;

/// Snapshot of a [`VersionedCell`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Versioned {
    pub value: u32,
    pub version: u32,
}

impl Versioned {
    #[inline]
    fn pack(self) -> u64 {
        (u64::from(self.version) << 32) | u64::from(self.value)
    }

    #[inline]
    fn unpack(raw: u64) -> Self {
        Self {
            value: raw as u32,
            version: (raw >> 32) as u32,
        }
    }
}

/// Value with a version stamp that advances on every successful write
///
/// Detects ABA: a writer that saw version `n` cannot overwrite a value that was changed and changed
/// back in the meantime.
#[derive(Debug)]
pub struct VersionedCell {
    raw: AtomicCell<u64>,
}

impl VersionedCell {
    pub fn new(value: u32) -> Self {
        Self {
            raw: AtomicCell::new(Versioned { value, version: 0 }.pack()),
        }
    }

    #[inline]
    pub fn load(&self) -> Versioned {
        Versioned::unpack(self.raw.load())
    }

    /// Unconditionally write `value`, bumping the version; returns the new snapshot
    pub fn set(&self, value: u32) -> Versioned {
        self.update(|_| Some(value)).unwrap_or_else(|current| current)
    }

    /// Write `value` only if the cell still matches `expected` (value and version)
    pub fn compare_exchange(&self, expected: Versioned, value: u32) -> Result<Versioned, Versioned> {
        let next = Versioned {
            value,
            version: expected.version.wrapping_add(1),
        };
        let previous = Versioned::unpack(self.raw.compare_exchange(expected.pack(), next.pack()));
        if previous == expected {
            Ok(next)
        } else {
            Err(previous)
        }
    }

    /// CAS retry loop over the value; `Ok(new snapshot)` or `Err(current)` if `f` aborted
    pub fn update(&self, mut f: impl FnMut(u32) -> Option<u32>) -> Result<Versioned, Versioned> {
        let mut written = 0u64;
        let result = self.raw.update(|raw| {
            let current = Versioned::unpack(raw);
            f(current.value).map(|value| {
                written = Versioned {
                    value,
                    version: current.version.wrapping_add(1),
                }
                .pack();
                written
            })
        });
        match result {
            Ok(_) => Ok(Versioned::unpack(written)),
            Err(current) => Err(Versioned::unpack(current)),
        }
    }
}
