mod error;
mod tls;

pub use error::TlsError;
pub use tls::{
    load_certs_from_pem, load_listener_config, load_listener_config_from_pem,
    load_private_key_from_pem, load_target_config, server_name,
};
