// Domain models: boiler snapshot and derived chart series

mod series;
mod snapshot;

pub use series::{
    MODULATION_BASE, MODULATION_DIVISOR, Normalization, STARTS_DISPLAY_MAX, Series, SeriesPoint,
    Window, modulation_forward, modulation_inverse,
};
pub use snapshot::{Field, FieldKind, Snapshot};
