// Build script for native library linking
//
// The `libmpv` feature binds the raw libmpv client API, so the final
// artifact must link against the system (or NDK-bundled) libmpv.

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=MPV_LIB_DIR");

    if std::env::var_os("CARGO_FEATURE_LIBMPV").is_some() {
        if let Some(dir) = std::env::var_os("MPV_LIB_DIR") {
            println!(
                "cargo:rustc-link-search=native={}",
                std::path::Path::new(&dir).display()
            );
        }
        println!("cargo:rustc-link-lib=mpv");
    }

    // Ensure Android builds link against libc++_shared so symbols like
    // __cxa_pure_virtual resolve correctly on all ABIs (arm/x86).
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("android") {
        println!("cargo:rustc-link-lib=c++_shared");
    }
}
