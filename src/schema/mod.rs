//! Schema-driven casting and validation of flat records

pub mod cast;
pub mod validation;

pub use cast::{cast_record, cast_value, infer_type_schema, CastReport, CastType, TypeSchema};
pub use validation::{
    filter_valid_records, validate_record, validate_records, ErrorSummary, ExpectedType,
    FieldConstraint, ValidationReport, ValidationSchema,
};
