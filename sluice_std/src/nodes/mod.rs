// Gates
mod boolean;
pub use boolean::{and_type, not_type, or_type, toggle_type, GATE_PORTS};

// Sources
mod constant;
pub use constant::{constant_boolean_type, constant_int_type};

mod wallclock;
pub use wallclock::wallclock_minute_type;

// Arithmetic
mod int;
pub use int::{addition_type, OPERAND_PORTS};

// Sinks
mod console;
pub use console::console_type;
