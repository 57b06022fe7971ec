//! ---
//! agvs_section: "07-daemon"
//! agvs_subsection: "binary"
//! agvs_type: "source"
//! agvs_scope: "code"
//! agvs_description: "Build metadata capture for the AGVS daemon."
//! agvs_version: "v0.1.0-alpha"
//! agvs_owner: "tbd"
//! ---
use vergen::EmitBuilder;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Default emission degrades to placeholder values outside a git checkout.
    EmitBuilder::builder()
        .all_build()
        .all_cargo()
        .all_git()
        .emit()?;
    println!("cargo:rerun-if-changed=build.rs");
    Ok(())
}
