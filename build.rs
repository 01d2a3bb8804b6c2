//! Retrieves information about the version of the tuner from Git and the build
//! environment. It can be accessed at runtime through [`shadow_rs`] constants.

fn main() -> shadow_rs::SdResult<()> {
    shadow_rs::new()
}
