//! Target platform model: triples, data layouts, and type widths.
//!
//! Every architecture/OS pair the generator supports maps to an LLVM
//! triple, a data-layout string, and the bit widths of `pointer`,
//! `wchar_t`, and `long`. The expression lowerer never hardcodes a
//! width; it asks the descriptor.

use super::error::CodeGenError;

/// Supported target architectures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    X86_64,
    X86,
    Arm64,
    Arm,
    Riscv64,
    Riscv32,
    Wasm32,
    Wasm64,
}

/// Supported target operating systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Os {
    Linux,
    Windows,
    MacOs,
    FreeBsd,
    Wasi,
}

impl std::fmt::Display for Arch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Arch::X86_64 => "x86_64",
            Arch::X86 => "x86",
            Arch::Arm64 => "arm64",
            Arch::Arm => "arm",
            Arch::Riscv64 => "riscv64",
            Arch::Riscv32 => "riscv32",
            Arch::Wasm32 => "wasm32",
            Arch::Wasm64 => "wasm64",
        };
        write!(f, "{}", name)
    }
}

impl std::fmt::Display for Os {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Os::Linux => "linux",
            Os::Windows => "windows",
            Os::MacOs => "macos",
            Os::FreeBsd => "freebsd",
            Os::Wasi => "wasi",
        };
        write!(f, "{}", name)
    }
}

/// A resolved target platform.
///
/// Construction fails with `UnsupportedPlatform` for pairs the generator
/// cannot describe (e.g. RISC-V on macOS), so a bad `--target` surfaces
/// before any IR is emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetPlatform {
    pub arch: Arch,
    pub os: Os,
    triple: String,
    data_layout: String,
    pointer_width: u32,
    wchar_width: u32,
    long_width: u32,
}

impl TargetPlatform {
    /// Resolve an architecture/OS pair into a full platform description.
    pub fn new(arch: Arch, os: Os) -> Result<Self, CodeGenError> {
        let triple = triple_for(arch, os)?;
        let data_layout = data_layout_for(arch, os)?;

        let pointer_width = match arch {
            Arch::X86_64 | Arch::Arm64 | Arch::Riscv64 | Arch::Wasm64 => 64,
            Arch::X86 | Arch::Arm | Arch::Riscv32 | Arch::Wasm32 => 32,
        };
        let wchar_width = match os {
            Os::Windows => 16,
            _ => 32,
        };
        let long_width = match os {
            Os::Windows => 32,
            _ => pointer_width,
        };

        Ok(TargetPlatform {
            arch,
            os,
            triple: triple.to_string(),
            data_layout: data_layout.to_string(),
            pointer_width,
            wchar_width,
            long_width,
        })
    }

    /// Detect the platform of the machine the generator is running on.
    pub fn host() -> Result<Self, CodeGenError> {
        let arch = if cfg!(target_arch = "x86_64") {
            Arch::X86_64
        } else if cfg!(target_arch = "x86") {
            Arch::X86
        } else if cfg!(target_arch = "aarch64") {
            Arch::Arm64
        } else if cfg!(target_arch = "arm") {
            Arch::Arm
        } else if cfg!(target_arch = "riscv64") {
            Arch::Riscv64
        } else if cfg!(target_arch = "wasm32") {
            Arch::Wasm32
        } else {
            return Err(CodeGenError::UnsupportedPlatform(
                "unrecognized host architecture".to_string(),
            ));
        };

        let os = if cfg!(target_os = "linux") {
            Os::Linux
        } else if cfg!(target_os = "windows") {
            Os::Windows
        } else if cfg!(target_os = "macos") {
            Os::MacOs
        } else if cfg!(target_os = "freebsd") {
            Os::FreeBsd
        } else if cfg!(target_os = "wasi") {
            Os::Wasi
        } else {
            return Err(CodeGenError::UnsupportedPlatform(
                "unrecognized host operating system".to_string(),
            ));
        };

        TargetPlatform::new(arch, os)
    }

    /// Parse a triple like `x86_64-unknown-linux-gnu` by keyword scan of
    /// its components. The vendor field is ignored.
    pub fn from_triple(triple: &str) -> Result<Self, CodeGenError> {
        let lower = triple.to_ascii_lowercase();
        let parts: Vec<&str> = lower.split('-').collect();
        if parts.is_empty() || parts[0].is_empty() {
            return Err(CodeGenError::UnsupportedPlatform(format!(
                "empty triple '{}'",
                triple
            )));
        }

        let arch = match parts[0] {
            a if a == "x86_64" || a == "amd64" => Arch::X86_64,
            a if a == "i686" || a == "i586" || a == "i386" || a == "x86" => Arch::X86,
            a if a == "aarch64" || a == "arm64" => Arch::Arm64,
            a if a == "riscv64" => Arch::Riscv64,
            a if a == "riscv32" => Arch::Riscv32,
            a if a == "wasm64" => Arch::Wasm64,
            a if a == "wasm32" => Arch::Wasm32,
            a if a.starts_with("arm") || a.starts_with("thumb") => Arch::Arm,
            other => {
                return Err(CodeGenError::UnsupportedPlatform(format!(
                    "unknown architecture '{}' in triple '{}'",
                    other, triple
                )));
            }
        };

        let rest = &parts[1..];
        let os = if rest.iter().any(|p| p.contains("linux")) {
            Os::Linux
        } else if rest.iter().any(|p| p.contains("windows")) {
            Os::Windows
        } else if rest
            .iter()
            .any(|p| p.contains("darwin") || p.contains("macos"))
        {
            Os::MacOs
        } else if rest.iter().any(|p| p.contains("freebsd")) {
            Os::FreeBsd
        } else if rest.iter().any(|p| p.contains("wasi")) {
            Os::Wasi
        } else {
            return Err(CodeGenError::UnsupportedPlatform(format!(
                "unknown operating system in triple '{}'",
                triple
            )));
        };

        TargetPlatform::new(arch, os)
    }

    pub fn triple(&self) -> &str {
        &self.triple
    }

    pub fn data_layout(&self) -> &str {
        &self.data_layout
    }

    pub fn pointer_width(&self) -> u32 {
        self.pointer_width
    }

    pub fn wchar_width(&self) -> u32 {
        self.wchar_width
    }

    pub fn long_width(&self) -> u32 {
        self.long_width
    }

    /// LLVM type name of a pointer-sized integer (`saddr`/`uaddr`).
    pub fn pointer_int_type(&self) -> &'static str {
        if self.pointer_width == 64 { "i64" } else { "i32" }
    }

    /// LLVM type name of the platform's `wchar_t`.
    pub fn wide_char_type(&self) -> &'static str {
        if self.wchar_width == 16 { "i16" } else { "i32" }
    }

    /// LLVM type name of the platform's C `long`.
    pub fn long_type(&self) -> &'static str {
        if self.long_width == 64 { "i64" } else { "i32" }
    }
}

fn triple_for(arch: Arch, os: Os) -> Result<&'static str, CodeGenError> {
    let triple = match (arch, os) {
        (Arch::X86_64, Os::Linux) => "x86_64-unknown-linux-gnu",
        (Arch::X86_64, Os::Windows) => "x86_64-pc-windows-msvc",
        (Arch::X86_64, Os::MacOs) => "x86_64-apple-macosx14.0.0",
        (Arch::X86_64, Os::FreeBsd) => "x86_64-unknown-freebsd",
        (Arch::X86, Os::Linux) => "i686-unknown-linux-gnu",
        (Arch::X86, Os::Windows) => "i686-pc-windows-msvc",
        (Arch::X86, Os::FreeBsd) => "i686-unknown-freebsd",
        (Arch::Arm64, Os::Linux) => "aarch64-unknown-linux-gnu",
        (Arch::Arm64, Os::Windows) => "aarch64-pc-windows-msvc",
        (Arch::Arm64, Os::MacOs) => "arm64-apple-macosx14.0.0",
        (Arch::Arm64, Os::FreeBsd) => "aarch64-unknown-freebsd",
        (Arch::Arm, Os::Linux) => "armv7-unknown-linux-gnueabihf",
        (Arch::Riscv64, Os::Linux) => "riscv64-unknown-linux-gnu",
        (Arch::Riscv64, Os::FreeBsd) => "riscv64-unknown-freebsd",
        (Arch::Riscv32, Os::Linux) => "riscv32-unknown-linux-gnu",
        (Arch::Wasm32, Os::Wasi) => "wasm32-wasi",
        (Arch::Wasm64, Os::Wasi) => "wasm64-wasi",
        (arch, os) => {
            return Err(CodeGenError::UnsupportedPlatform(format!(
                "{} on {}",
                arch, os
            )));
        }
    };
    Ok(triple)
}

fn data_layout_for(arch: Arch, os: Os) -> Result<&'static str, CodeGenError> {
    let layout = match (arch, os) {
        (Arch::X86_64, Os::Linux) | (Arch::X86_64, Os::FreeBsd) => {
            "e-m:e-p270:32:32-p271:32:32-p272:64:64-i64:64-f80:128-n8:16:32:64-S128"
        }
        (Arch::X86_64, Os::Windows) => {
            "e-m:w-p270:32:32-p271:32:32-p272:64:64-i64:64-f80:128-n8:16:32:64-S128"
        }
        (Arch::X86_64, Os::MacOs) => {
            "e-m:o-p270:32:32-p271:32:32-p272:64:64-i64:64-f80:128-n8:16:32:64-S128"
        }
        (Arch::X86, Os::Linux) | (Arch::X86, Os::FreeBsd) => {
            "e-m:e-p:32:32-p270:32:32-p271:32:32-p272:64:64-f64:32:64-f80:32-n8:16:32-S128"
        }
        (Arch::X86, Os::Windows) => {
            "e-m:x-p:32:32-p270:32:32-p271:32:32-p272:64:64-f64:32:64-f80:32-n8:16:32-S32"
        }
        (Arch::Arm64, Os::Linux) | (Arch::Arm64, Os::FreeBsd) => {
            "e-m:e-i8:8:32-i16:16:32-i64:64-i128:128-n32:64-S128"
        }
        (Arch::Arm64, Os::Windows) => "e-m:w-p:64:64-i32:32-i64:64-i128:128-n32:64-S128",
        (Arch::Arm64, Os::MacOs) => "e-m:o-i64:64-i128:128-n32:64-S128",
        (Arch::Arm, Os::Linux) => "e-m:e-p:32:32-Fi8-i64:64-v128:64:128-a:0:32-n32-S64",
        (Arch::Riscv64, Os::Linux) | (Arch::Riscv64, Os::FreeBsd) => {
            "e-m:e-p:64:64-i64:64-i128:128-n32:64-S128"
        }
        (Arch::Riscv32, Os::Linux) => "e-m:e-p:32:32-i64:64-n32-S128",
        (Arch::Wasm32, Os::Wasi) => {
            "e-m:e-p:32:32-p10:8:8-p20:8:8-i64:64-n32:64-S128-ni:1:10:20"
        }
        (Arch::Wasm64, Os::Wasi) => {
            "e-m:e-p:64:64-p10:8:8-p20:8:8-i64:64-n32:64-S128-ni:1:10:20"
        }
        (arch, os) => {
            return Err(CodeGenError::UnsupportedPlatform(format!(
                "{} on {}",
                arch, os
            )));
        }
    };
    Ok(layout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linux_x86_64() {
        let platform = TargetPlatform::new(Arch::X86_64, Os::Linux).unwrap();
        assert_eq!(platform.triple(), "x86_64-unknown-linux-gnu");
        assert_eq!(platform.pointer_width(), 64);
        assert_eq!(platform.wchar_width(), 32);
        assert_eq!(platform.long_width(), 64);
        assert_eq!(platform.pointer_int_type(), "i64");
        assert_eq!(platform.long_type(), "i64");
    }

    #[test]
    fn test_windows_widths() {
        let platform = TargetPlatform::new(Arch::X86_64, Os::Windows).unwrap();
        assert_eq!(platform.wchar_width(), 16);
        assert_eq!(platform.wide_char_type(), "i16");
        // LLP64: long stays 32-bit even on 64-bit Windows
        assert_eq!(platform.long_type(), "i32");
    }

    #[test]
    fn test_unsupported_pair_fails() {
        let err = TargetPlatform::new(Arch::Riscv64, Os::MacOs).unwrap_err();
        assert!(err.to_string().contains("unsupported platform"));
    }

    #[test]
    fn test_from_triple_keyword_scan() {
        let platform = TargetPlatform::from_triple("aarch64-unknown-linux-gnu").unwrap();
        assert_eq!(platform.arch, Arch::Arm64);
        assert_eq!(platform.os, Os::Linux);

        let platform = TargetPlatform::from_triple("arm64-apple-macosx14.0.0").unwrap();
        assert_eq!(platform.arch, Arch::Arm64);
        assert_eq!(platform.os, Os::MacOs);

        let platform = TargetPlatform::from_triple("wasm32-wasi").unwrap();
        assert_eq!(platform.arch, Arch::Wasm32);
        assert_eq!(platform.os, Os::Wasi);
    }

    #[test]
    fn test_from_triple_rejects_unknown() {
        assert!(TargetPlatform::from_triple("sparc64-sun-solaris").is_err());
        assert!(TargetPlatform::from_triple("x86_64-unknown-haiku").is_err());
        assert!(TargetPlatform::from_triple("").is_err());
    }

    #[test]
    fn test_32_bit_pointer_int() {
        let platform = TargetPlatform::new(Arch::Riscv32, Os::Linux).unwrap();
        assert_eq!(platform.pointer_int_type(), "i32");
        assert_eq!(platform.pointer_width(), 32);
    }
}
