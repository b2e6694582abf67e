use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    iris::cli::main()
}
