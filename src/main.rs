fn main() {
    let res = treesim::app::run();
    if let Err(err) = res {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}
