use actix_cors::Cors;
use actix_web::http::header;
use actix_web::{middleware, web, App, HttpServer};
use cloud_store::{handlers, Config};
use log::{error, info, warn};
use rustls::ServerConfig;
use rustls_pemfile::{certs, pkcs8_private_keys};
use std::env;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

fn load_tls_config(cert_path: &Path, key_path: &Path) -> io::Result<ServerConfig> {
    let cert_file = &mut BufReader::new(File::open(cert_path)?);
    let key_file = &mut BufReader::new(File::open(key_path)?);
    let cert_chain = certs(cert_file).collect::<Result<Vec<_>, _>>()?;
    let mut keys = pkcs8_private_keys(key_file).collect::<Result<Vec<_>, _>>()?;

    if keys.is_empty() {
        return Err(io::Error::new(io::ErrorKind::Other, "No private keys found in key file"));
    }

    ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert_chain, keys.remove(0).into())
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv::dotenv().ok();
    // Override the log level with RUST_LOG, e.g. `RUST_LOG=debug`.
    env::set_var("RUST_LOG", env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()));
    env_logger::init();

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        io::Error::new(io::ErrorKind::Other, e.to_string())
    })?;
    let addr = config.bind_addr();
    info!(
        "Serving '{}' (storage directory '{}') on {}",
        config.storage_root.display(),
        config.storage_prefix,
        addr
    );

    let tls = match (&config.cert_path, &config.key_path) {
        (Some(cert_path), Some(key_path)) if cert_path.exists() && key_path.exists() => {
            info!("Attempting to start HTTPS server...");
            Some(load_tls_config(cert_path, key_path)?)
        }
        (Some(_), Some(_)) => {
            warn!("CERT_PATH or KEY_PATH points to a non-existent file. Starting without HTTPS.");
            None
        }
        _ => {
            info!("No CERT_PATH or KEY_PATH found in env. Starting plain HTTP server.");
            None
        }
    };

    let shared_config = web::Data::new(config);
    let http_server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allowed_methods(vec!["GET", "POST", "DELETE", "OPTIONS"])
            .allowed_headers(vec![header::AUTHORIZATION, header::ACCEPT, header::CONTENT_TYPE])
            .expose_headers(vec![header::CONTENT_DISPOSITION])
            .max_age(3600);

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(shared_config.clone())
            .configure(handlers::register)
    });

    let http_server = match tls {
        Some(tls_config) => {
            info!("Successfully configured TLS. Binding to https://{}", addr);
            http_server.bind_rustls_0_23(&addr, tls_config)?
        }
        None => {
            info!("Server running at http://{}", addr);
            http_server.bind(&addr)?
        }
    };

    http_server.run().await
}
