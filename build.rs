// build.rs

//! Locates the native crossing library when the `crossgrid` feature is enabled.
//!
//! Two discovery modes:
//!  • Default (pkg-config):  `pkg_config::probe("crossgrid")`
//!  • Manual    (env-vars):  `CROSSGRID_NO_PKG_CONFIG=1` plus `CROSSGRID_LIB_DIR`
//!                           (and optionally `CROSSGRID_LIB_NAME`, default `crossgrid`).

#[cfg(feature = "crossgrid")]
fn main() {
    use std::env;

    println!("cargo:rerun-if-env-changed=CROSSGRID_NO_PKG_CONFIG");
    println!("cargo:rerun-if-env-changed=CROSSGRID_LIB_DIR");
    println!("cargo:rerun-if-env-changed=CROSSGRID_LIB_NAME");

    if env::var_os("CROSSGRID_NO_PKG_CONFIG").is_some() {
        let lib_dir = env::var("CROSSGRID_LIB_DIR")
            .expect("CROSSGRID_LIB_DIR must be set when CROSSGRID_NO_PKG_CONFIG=1");
        let name = env::var("CROSSGRID_LIB_NAME").unwrap_or_else(|_| "crossgrid".to_string());
        println!("cargo:rustc-link-search=native={lib_dir}");
        println!("cargo:rustc-link-lib=dylib={name}");
    } else {
        // pkg-config prints the link-search and link-lib lines itself
        pkg_config::Config::new()
            .statik(false)
            .probe("crossgrid")
            .expect("Could not find crossgrid via pkg-config; set CROSSGRID_NO_PKG_CONFIG=1 to bypass");
    }
}

#[cfg(not(feature = "crossgrid"))]
fn main() {
    // Nothing to link without the native backend
}
