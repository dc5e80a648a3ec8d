pub mod dates;
pub mod extractor;
pub mod model;
pub mod normalizer;
pub mod reconciler;
pub mod session;

pub use dates::normalize_date;
pub use extractor::{parse_model_json, InvoiceService};
pub use model::{ImagePayload, OpenAiVisionClient, VisionModel, VisionRequest};
pub use normalizer::normalize;
pub use reconciler::Reconciler;
pub use session::{RequestGuard, RequestTicket, SessionStore};
