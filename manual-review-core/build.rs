fn main() {
    built::write_built_file().expect("Failed to acquire build-time information");

    // Packaged builds have no .git directory, so they pass the hash in explicitly.
    println!("cargo:rerun-if-env-changed=MANUAL_REVIEW_GIT_HASH");
    if let Ok(hash) = std::env::var("MANUAL_REVIEW_GIT_HASH") {
        println!("cargo:rustc-env=MANUAL_REVIEW_GIT_HASH={}", hash);
    }
}
