pub mod catalog_controller;
pub mod extract_controller;
pub mod health_controller;
pub mod proxy_controller;
