use std::process::ExitCode;

use model_image::Driver;

fn main() -> ExitCode {
    let code = Driver::new().run(std::env::args_os());
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
