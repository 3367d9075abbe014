fn main() {
    if let Err(err) = mail_csv_tap::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
