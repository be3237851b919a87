mod value;
mod values;

pub use value::{
    BoolValue, FieldType, FloatValue, IntegerValue, StringValue, UnsignedValue, Value,
};
pub use values::{TValues, Values};
