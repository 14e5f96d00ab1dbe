//! System Use Sharing Protocol (SUSP) and the Rock Ridge entries carried
//! over it.
//!
//! A directory record's system-use trailer, together with any continuation
//! regions linked by `CE` entries, forms one logical SUSP area. The [`entry`]
//! module codes individual entries and splits `NM`/`SL` at byte budgets; the
//! [`area`] module assembles, compacts, and emits whole areas.

pub mod area;
pub mod entry;

pub use area::{emit_area, AllocatedRegion, SuspArea, SuspRegion, CE_LEN};
pub use entry::{ComponentFlags, NameFlags, SuspEntry, SymlinkComponent, TfTimestamp, TimestampsEntry};
