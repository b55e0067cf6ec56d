// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! This build script writes `memory.x` into a directory where the linker can
//! always find it at build time, and asks Cargo to rerun when the layout
//! changes.

use std::env;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

/// Flash taken by the SoftDevice S112 7.x at the start of flash.
const SOFTDEVICE_FLASH_RESERVED: u32 = 0x19000;
/// The SoftDevice S112 minimal RAM requirement is 3.7K (0xEB8)
/// plus room for its call stack. We reserve 10648 bytes (0x2998).
const SOFTDEVICE_RAM_RESERVED: u32 = 10648;
/// nRF52805: 192K flash, 24K RAM.
const FLASH_SIZE: u32 = 192 * 1024;
const RAM_SIZE: u32 = 24 * 1024;

fn main() {
    // Put `memory.x` in our output directory and ensure it's
    // on the linker search path.
    let out = &PathBuf::from(env::var_os("OUT_DIR").unwrap());

    let memory_x_content = format!(
        r##"
        MEMORY
        {{
            /* NOTE 1 K = 1 KiBi = 1024 bytes */
            FLASH (rx) : ORIGIN = {:#X}, LENGTH = {:#X}
            RAM : ORIGIN = 0x20000000 + {:#X}, LENGTH = {:#X}
        }}
        "##,
        SOFTDEVICE_FLASH_RESERVED,
        FLASH_SIZE - SOFTDEVICE_FLASH_RESERVED,
        SOFTDEVICE_RAM_RESERVED,
        RAM_SIZE - SOFTDEVICE_RAM_RESERVED
    );
    File::create(out.join("memory.x"))
        .unwrap()
        .write_all(memory_x_content.as_bytes())
        .unwrap();

    println!("cargo:rustc-link-search={}", out.display());
    println!("cargo:rerun-if-changed=build.rs");

    println!("cargo:rustc-link-arg-bins=--nmagic");
    println!("cargo:rustc-link-arg-bins=-Tlink.x");
    println!("cargo:rustc-link-arg-bins=-Tdefmt.x");
}
