fn main() {
    println!("cargo:rerun-if-changed=resources/downloader-icon.ico");

    #[cfg(windows)]
    {
        use std::env;
        use std::path::PathBuf;

        let Ok(manifest_dir) = env::var("CARGO_MANIFEST_DIR") else {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set, skipping resources");
            return;
        };
        let ico_path = PathBuf::from(&manifest_dir)
            .join("resources")
            .join("downloader-icon.ico");

        let mut res = winres::WindowsResource::new();
        res.set("ProductName", "Build Downloader");
        res.set("FileDescription", "Pre-release build scheduling daemon");

        // ICO 파일이 있으면 사용, 없으면 경고
        if ico_path.exists() {
            res.set_icon(&ico_path.to_string_lossy());
        } else {
            println!(
                "cargo:warning=Icon file not found. Place downloader-icon.ico in the resources directory: {}",
                ico_path.display()
            );
        }

        if let Err(e) = res.compile() {
            println!("cargo:warning=Failed to compile resources: {}", e);
        }
    }
}
