use std::env;

/// 可用于 `#[repr(align(N))]` 的 cache line 大小
const ALIGNABLE_LINE_SIZES: [usize; 5] = [16, 32, 64, 128, 256];

fn main() {
    let arch = env::var("CARGO_CFG_TARGET_ARCH").unwrap_or_default();
    let esp32s3 = env::var_os("CARGO_FEATURE_ESP32S3").is_some();

    // ===== 后端解析: 恰好一个实现，或者 stub =====
    let backend = select_backend(&arch, esp32s3);
    println!(
        "cargo:rustc-check-cfg=cfg(cache_backend, values(\"external\", \"xtensa\", \"aarch64\", \"esp32s3\", \"stub\"))"
    );
    println!("cargo:rustc-cfg=cache_backend=\"{backend}\"");

    // ESP32-S3 与 Xtensa LX7 默认 32 字节，主流 64 位核默认 64 字节
    let default_line = match arch.as_str() {
        _ if esp32s3 => 32,
        "xtensa" => 32,
        "aarch64" | "x86_64" | "riscv64" => 64,
        _ => 0,
    };

    // 未启用的域没有 line，默认值只给编译进来的域
    let dcache = env::var_os("CARGO_FEATURE_DCACHE").is_some();
    let icache = env::var_os("CARGO_FEATURE_ICACHE").is_some();
    let dcache_line = line_size("RUSTRTOS_DCACHE_LINE_SIZE", if dcache { default_line } else { 0 });
    let icache_line = line_size("RUSTRTOS_ICACHE_LINE_SIZE", if icache { default_line } else { 0 });

    println!("cargo:rustc-env=RUSTRTOS_DCACHE_LINE_SIZE={dcache_line}");
    println!("cargo:rustc-env=RUSTRTOS_ICACHE_LINE_SIZE={icache_line}");

    // 对齐属性只能写字面量，所以把 line 大小转成 cfg
    let values: Vec<String> = ALIGNABLE_LINE_SIZES.iter().map(|v| format!("\"{v}\"")).collect();
    println!("cargo:rustc-check-cfg=cfg(dcache_line_size, values({}))", values.join(", "));
    if dcache_line != 0 {
        println!("cargo:rustc-cfg=dcache_line_size=\"{dcache_line}\"");
    }

    // 镜像内存: 地址高 3 位选择 512MB 区域
    let cached = region("RUSTRTOS_CACHED_REGION", 5);
    let uncached = region("RUSTRTOS_UNCACHED_REGION", 4);
    if cached == uncached {
        panic!("RUSTRTOS_CACHED_REGION and RUSTRTOS_UNCACHED_REGION must differ (both {cached})");
    }
    println!("cargo:rustc-env=RUSTRTOS_CACHED_REGION={cached}");
    println!("cargo:rustc-env=RUSTRTOS_UNCACHED_REGION={uncached}");

    // 整体 cache 容量，按索引遍历的 *_all 操作需要
    let dcache_size = cache_size("RUSTRTOS_DCACHE_SIZE");
    let icache_size = cache_size("RUSTRTOS_ICACHE_SIZE");
    println!("cargo:rustc-env=RUSTRTOS_DCACHE_SIZE={dcache_size}");
    println!("cargo:rustc-env=RUSTRTOS_ICACHE_SIZE={icache_size}");

    for var in [
        "RUSTRTOS_DCACHE_SIZE",
        "RUSTRTOS_ICACHE_SIZE",
        "RUSTRTOS_DCACHE_LINE_SIZE",
        "RUSTRTOS_ICACHE_LINE_SIZE",
        "RUSTRTOS_CACHED_REGION",
        "RUSTRTOS_UNCACHED_REGION",
    ] {
        println!("cargo:rerun-if-env-changed={var}");
    }
    println!("cargo:rerun-if-changed=build.rs");
}

fn select_backend(arch: &str, esp32s3: bool) -> &'static str {
    let requested: Vec<&str> = [
        ("external", "CARGO_FEATURE_BACKEND_EXTERNAL"),
        ("arch", "CARGO_FEATURE_BACKEND_ARCH"),
        ("soc", "CARGO_FEATURE_BACKEND_SOC"),
    ]
    .into_iter()
    .filter(|(_, feature)| env::var_os(feature).is_some())
    .map(|(name, _)| name)
    .collect();

    match requested.as_slice() {
        [] => "stub",
        ["external"] => "external",
        ["arch"] => match arch {
            "xtensa" => "xtensa",
            "aarch64" => "aarch64",
            other => panic!("`backend-arch` has no native cache instructions for target arch `{other}`"),
        },
        ["soc"] if esp32s3 => "esp32s3",
        ["soc"] => panic!("`backend-soc` needs a chip feature (`esp32s3`)"),
        many => panic!("select at most one cache backend, got {many:?}"),
    }
}

fn cache_size(var: &str) -> usize {
    let Ok(raw) = env::var(var) else {
        return 0;
    };
    match raw.trim().parse::<usize>() {
        Ok(value) if value == 0 || value.is_power_of_two() => value,
        _ => panic!("{var}={raw:?} must be 0 or a power of two"),
    }
}

fn line_size(var: &str, default: usize) -> usize {
    let Ok(raw) = env::var(var) else {
        return default;
    };
    let value: usize = raw
        .trim()
        .parse()
        .unwrap_or_else(|_| panic!("{var}={raw:?} is not a number"));
    if value != 0 && !ALIGNABLE_LINE_SIZES.contains(&value) {
        panic!("{var}={value} must be 0 or one of {ALIGNABLE_LINE_SIZES:?}");
    }
    value
}

fn region(var: &str, default: u8) -> u8 {
    let Ok(raw) = env::var(var) else {
        return default;
    };
    match raw.trim().parse::<u8>() {
        Ok(value) if value < 8 => value,
        _ => panic!("{var}={raw:?} must be a region index in 0..8"),
    }
}
