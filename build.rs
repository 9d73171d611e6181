fn main() {
    println!("cargo:rerun-if-changed=proto/pkv.proto");
    prost_build::compile_protos(&["proto/pkv.proto"], &["proto/"])
        .expect("failed to compile wire protocol definitions");
}
