//! MongoDB operator names for building filters, updates and pipelines by hand.
//!
//! ```ignore
//! use odmlayer::{bson::doc, operator};
//!
//! let filter = doc! { "age": { operator::GT: 24 } };
//! ```

// Comparison
pub const EQ: &str = "$eq";
pub const GT: &str = "$gt";
pub const GTE: &str = "$gte";
pub const IN: &str = "$in";
pub const LT: &str = "$lt";
pub const LTE: &str = "$lte";
pub const NE: &str = "$ne";
pub const NIN: &str = "$nin";

// Logical
pub const AND: &str = "$and";
pub const NOT: &str = "$not";
pub const NOR: &str = "$nor";
pub const OR: &str = "$or";

// Element
pub const EXISTS: &str = "$exists";
pub const TYPE: &str = "$type";

// Evaluation
pub const EXPR: &str = "$expr";
pub const REGEX: &str = "$regex";
pub const OPTIONS: &str = "$options";

// Update
pub const SET: &str = "$set";
pub const UNSET: &str = "$unset";
pub const INC: &str = "$inc";
pub const PUSH: &str = "$push";

// Aggregation stages
pub const ADD_FIELDS: &str = "$addFields";
pub const BUCKET: &str = "$bucket";
pub const BUCKET_AUTO: &str = "$bucketAuto";
pub const COLL_STATS: &str = "$collStats";
pub const COUNT: &str = "$count";
pub const FACET: &str = "$facet";
pub const GRAPH_LOOKUP: &str = "$graphLookup";
pub const GROUP: &str = "$group";
pub const LIMIT: &str = "$limit";
pub const LOOKUP: &str = "$lookup";
pub const MATCH: &str = "$match";
pub const PROJECT: &str = "$project";
pub const REPLACE_ROOT: &str = "$replaceRoot";
pub const SAMPLE: &str = "$sample";
pub const SKIP: &str = "$skip";
pub const SORT: &str = "$sort";
pub const SORT_BY_COUNT: &str = "$sortByCount";
pub const UNWIND: &str = "$unwind";

// Accumulators
pub const AVG: &str = "$avg";
pub const FIRST: &str = "$first";
pub const LAST: &str = "$last";
pub const MAX: &str = "$max";
pub const MIN: &str = "$min";
pub const SUM: &str = "$sum";
pub const ADD_TO_SET: &str = "$addToSet";

// Expressions
pub const ADD: &str = "$add";
pub const CONCAT: &str = "$concat";
pub const DIVIDE: &str = "$divide";
pub const LITERAL: &str = "$literal";
pub const MULTIPLY: &str = "$multiply";
pub const SIZE: &str = "$size";
pub const SUBTRACT: &str = "$subtract";
pub const COND: &str = "$cond";
pub const FILTER: &str = "$filter";
pub const IF_NULL: &str = "$ifNull";
pub const LET: &str = "$let";
pub const MAP: &str = "$map";
pub const SWITCH: &str = "$switch";
