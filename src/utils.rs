mod increment_u64_id;
mod panic_message;

pub use increment_u64_id::increment_u64_id;
pub use panic_message::panic_message;
