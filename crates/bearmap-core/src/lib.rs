pub mod format;
pub mod geo;
pub mod ordering;
pub mod record;
pub mod view;

pub use format::{format_age, format_distance};
pub use geo::{BoundingBox, LatLng};
pub use ordering::{cmp_recency, sort_by_recency};
pub use record::{NewReport, Record, RecordError, RecordId, ReportKind};
pub use view::{ViewOrder, ViewRow, derive_view};
