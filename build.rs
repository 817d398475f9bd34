// Link the system libraries a static FFmpeg build pulls in on Windows/MSVC.
fn main() {
    #[cfg(all(target_os = "windows", target_env = "msvc"))]
    {
        let libs = [
            "libmfx",   // Intel QuickSync
            "libx264",  // x264
            "oleaut32", // OLE automation
            "vfw32",    // Video for Windows capture
            "secur32",  // Schannel TLS (rtsps)
            "ws2_32",   // sockets for rtsp/tcp
        ];
        for lib in libs {
            println!("cargo:rustc-link-lib=dylib={lib}");
        }
    }
    println!("cargo:rerun-if-changed=build.rs");
}
