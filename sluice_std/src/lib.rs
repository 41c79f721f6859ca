pub mod nodes;

use sluice_common::TypeRegistry;
use sluice_core::FlowError;

/// Register the standard node types.
pub fn add_std_types(registry: &mut TypeRegistry) -> Result<(), FlowError> {
    registry.add(nodes::not_type())?;
    registry.add(nodes::and_type())?;
    registry.add(nodes::or_type())?;
    registry.add(nodes::toggle_type())?;
    registry.add(nodes::constant_boolean_type())?;
    registry.add(nodes::constant_int_type())?;
    registry.add(nodes::addition_type())?;
    registry.add(nodes::console_type())?;
    registry.add(nodes::wallclock_minute_type())?;
    Ok(())
}
