pub mod collection_ext;
pub mod error;
pub mod string_ext;

pub use collection_ext::{diff_sets, group_by, unique_ordered, vec_to_map, vec_to_map_with};
pub use error::{ApiError, ApiResult};
pub use string_ext::{StringExt, clean_optional_string, trim_string};
