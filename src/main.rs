use tracing::{error, info_span, Level};

use tributary::{init_tracing, init_settings, init_runtime, run_coordinator};


fn main() {
    init_tracing(Level::INFO);

    let startup = info_span!("startup").entered();
    let conf = init_settings().expect("could not load config");
    let tokio = init_runtime().expect("could not create tokio runtime");
    drop(startup);

    if let Err(e) = run_coordinator(conf, &tokio) {
        error!(%e, "coordinator stopped");
        std::process::exit(1);
    }
}
