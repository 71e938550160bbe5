pub mod clients;
pub mod health;

pub use clients::{
    create_client, delete_client, get_client, list_clients, revenue_total, update_client,
    update_payment,
};
pub use health::{health_check, metrics_handler, readiness_check};
