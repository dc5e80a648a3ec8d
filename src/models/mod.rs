pub mod invoice;
pub mod session;
pub mod validation;

pub use invoice::{InvoiceRecord, LineItem, LineItemField};
pub use session::{SessionState, UploadInfo};
pub use validation::{MissingFieldPolicy, ValidationErrorSet, ValidationReport, Verdict};
