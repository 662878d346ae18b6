mod cli;

fn main() {
    tracing_subscriber::fmt::init();
    std::process::exit(cli::run());
}
