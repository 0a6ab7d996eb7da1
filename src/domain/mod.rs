// Domain layer: engine records and the ports the engine consumes.

pub mod model;
pub mod ports;
