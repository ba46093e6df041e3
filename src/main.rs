fn main() {
    if let Err(err) = ownership_graph::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
