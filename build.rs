// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Build script for uthread
//!
//! This build script assembles the architecture-specific context switch
//! routine that the scheduler calls through `arch::switch`.

use std::env;

fn main() {
    // Get the target architecture
    let target_arch = env::var("CARGO_CFG_TARGET_ARCH").unwrap();
    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap();

    if target_os != "linux" {
        // lib.rs refuses to compile for anything else
        return;
    }

    match target_arch.as_str() {
        "x86_64" => build_switch("src/arch/amd64/switch.S"),
        "aarch64" => build_switch("src/arch/arm64/switch.S"),
        _ => {}
    }
}

fn build_switch(source: &str) {
    println!("cargo:rerun-if-changed={}", source);

    cc::Build::new()
        .file(source)
        .compile("uthread_switch");
}
