pub mod context;
pub mod keycloak;
pub mod reconciler;
pub mod resources;
pub mod status;
pub mod store;
