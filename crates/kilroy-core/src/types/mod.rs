pub mod collection;
pub mod ids;
pub mod records;

pub use collection::{Collection, RecordKey};
pub use ids::ObjectId;
pub use records::{
    decode_record, encode_record, ChildRef, MaterialRef, Place, Record, Thing, User, UserUpdate,
    SCHEMA_VERSION,
};
