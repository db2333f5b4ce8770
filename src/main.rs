use tracing::{error, Level};

fn main() {
    pgrelay::init_tracing(Level::INFO);

    let conf = pgrelay::init_settings().expect("could not load config");
    let tokio = pgrelay::init_runtime().expect("could not create tokio runtime");

    tokio.block_on(async move {
        let service = pgrelay::build_service(conf).expect("could not create proxy service");
        // The accept loop only returns on a non-recoverable listener error.
        if let Err(e) = service.run().await {
            error!(%e, "proxy service terminated");
            std::process::exit(1);
        }
    });
}
