pub mod health_checks;
pub mod systems;
