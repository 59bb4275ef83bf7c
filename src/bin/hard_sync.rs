use tracing::{error, Level};

use tributary::{init_tracing, init_settings, init_runtime, run_hard_sync};


fn main() {
    init_tracing(Level::INFO);

    let conf = init_settings().expect("could not load config");
    let tokio = init_runtime().expect("could not create tokio runtime");

    if let Err(e) = run_hard_sync(conf, &tokio) {
        error!(%e, "hard sync failed");
        std::process::exit(1);
    }
}
