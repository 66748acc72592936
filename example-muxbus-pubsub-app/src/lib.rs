pub mod service_definition;
