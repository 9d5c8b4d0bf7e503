fn main() {
    if let Err(err) = csv_harmonizer::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
