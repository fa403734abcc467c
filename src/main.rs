use std::process;

fn main() {
    if let Err(err) = tapline::app::run() {
        eprintln!("fatal: {err:#}");
        process::exit(1);
    }
}
