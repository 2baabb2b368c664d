mod category;
mod classifier;
mod envelope;
mod records;
mod result;
mod topic;
mod validator;

pub use category::*;
pub use classifier::*;
pub use envelope::*;
pub use records::*;
pub use result::*;
pub use topic::*;
pub use validator::*;
