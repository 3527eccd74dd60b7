//! Conditional request headers
//!
//! - `parser`: the WebDAV `If` header grammar
//! - `evaluator`: OR-of-AND evaluation against etags and the lock store
//! - `resource_ref`: resolving tagged resource references to managed paths
//! - `etag`: etag sources
//! - `if_match`: plain `If-Match` / `If-None-Match`

pub mod etag;
pub mod evaluator;
pub mod if_match;
pub mod parser;
pub mod resource_ref;

pub use etag::{EtagOracle, FsEtagOracle, StaticEtags};
pub use evaluator::{ConditionEvaluator, Evaluation, SubmittedToken};
pub use if_match::check_if_match;
pub use parser::{Condition, ConditionKind, ConditionList, IfEntry, IfHeader};
pub use resource_ref::BaseUrl;
