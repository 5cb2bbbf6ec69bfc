mod catalog;
mod config;
mod credentials;
mod database;
mod error;
mod export;
mod model;
mod routes;
mod session;

use actix_identity::IdentityMiddleware;
use actix_session::{storage::CookieSessionStore, SessionMiddleware};
use actix_web::{middleware::Logger, web, App, HttpServer};
use catalog::Catalog;
use config::Config;

fn templates() -> tera::Result<tera::Tera> {
    tera::Tera::new(concat!(env!("CARGO_MANIFEST_DIR"), "/templates/**/*"))
}

fn io_error<E: std::fmt::Display>(err: E) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, err.to_string())
}

/// `vidrate restore <dump>` loads a database download into an empty store.
fn restore(config: &Config, dump_path: &str) -> std::io::Result<()> {
    let data = std::fs::read(dump_path)?;
    let db = sled::open(&config.db_path).map_err(io_error)?;
    export::restore(&db, &data).map_err(io_error)?;
    db.flush().map_err(io_error)?;
    log::info!("Restored {} into {}", dump_path, config.db_path.display());
    Ok(())
}

#[actix_rt::main]
async fn main() -> std::io::Result<()> {
    std::env::set_var("RUST_BACKTRACE", "1");
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("vidrate=debug,actix_web=info"),
    )
    .init();

    let config = Config::load().map_err(io_error)?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    if let [command, dump_path] = args.as_slice() {
        if command == "restore" {
            return restore(&config, dump_path);
        }
    }

    let tera = web::Data::new(templates().map_err(io_error)?);
    let db = web::Data::new(database::open(&config.db_path).map_err(io_error)?);
    let catalog = web::Data::new(Catalog::default());
    let accounts = web::Data::new(config.policy.clone());
    log::info!(
        "Serving {} videos from {}",
        catalog.videos().len(),
        config.db_path.display()
    );

    let session_key = config.session_key.clone();
    let secure_cookie = config.secure_cookie;
    let server_db = db.clone();
    HttpServer::new(move || {
        App::new()
            .wrap(IdentityMiddleware::default())
            .wrap(
                SessionMiddleware::builder(CookieSessionStore::default(), session_key.clone())
                    .cookie_name("vidrate-session".to_owned())
                    .cookie_secure(secure_cookie)
                    .build(),
            )
            .wrap(Logger::default())
            .app_data(tera.clone())
            .app_data(server_db.clone())
            .app_data(catalog.clone())
            .app_data(accounts.clone())
            .configure(routes::configure)
    })
    .bind(&config.bind)?
    .run()
    .await?;

    log::info!("Flushing database");
    db.flush().map_err(io_error)?;
    Ok(())
}
