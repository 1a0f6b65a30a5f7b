fn main() {
    println!("cargo:rerun-if-env-changed=QRAPP_VERSION");
}
