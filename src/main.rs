use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    eesyai::cli::main()
}
