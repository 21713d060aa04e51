// tests/common/mod.rs

//! Shared fixtures for pipeline integration tests.

use crucible::hash;
use crucible::pipeline::BuildSystem;
use crucible::resolve::platform_lib_ext;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Install a fake dependency under `prefix`: an include directory plus
/// one library file per stem.
pub fn install_fake_dep(prefix: &Path, include_subdir: Option<&str>, lib_stems: &[&str]) {
    let mut include = prefix.join("include");
    if let Some(subdir) = include_subdir {
        include = include.join(subdir);
    }
    fs::create_dir_all(&include).unwrap();
    let lib_dir = prefix.join("lib");
    fs::create_dir_all(&lib_dir).unwrap();
    for stem in lib_stems {
        fs::write(
            lib_dir.join(format!("{stem}.{}", platform_lib_ext())),
            b"\x7fELF",
        )
        .unwrap();
    }
}

/// Build a `<name>-<version>.tar.gz` with `files` under a single top
/// directory, returning the archive path and its sha256.
pub fn make_archive(
    dir: &Path,
    name: &str,
    version: &str,
    files: &[(&str, &str)],
) -> (PathBuf, String) {
    let top = format!("{name}-{version}");
    let stage = dir.join(&top);
    fs::create_dir_all(&stage).unwrap();
    for (rel, content) in files {
        let full = stage.join(rel);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(full, content).unwrap();
    }

    let archive_path = dir.join(format!("{top}.tar.gz"));
    let file = fs::File::create(&archive_path).unwrap();
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.append_dir_all(&top, &stage).unwrap();
    builder.into_inner().unwrap().finish().unwrap();

    let digest = hash::sha256_file(&archive_path).unwrap();
    (archive_path, digest)
}

fn write_script(dir: &Path, name: &str, body: &str) -> String {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().into_owned()
}

/// A stub build system driven by shell scripts.
///
/// The configure stub records its arguments in `configure-args.txt` and
/// its environment in `build-env.txt`, and remembers the install prefix.
/// The build stub "compiles" the source tree's `.c` files into one blob,
/// and on `install` copies the blob and a schema file into the prefix.
pub fn stub_build_system(dir: &Path) -> BuildSystem {
    let configure = write_script(
        dir,
        "stub-cmake",
        r#"
env | sort > build-env.txt
for arg in "$@"; do
    echo "$arg" >> configure-args.txt
    case "$arg" in
        -DCMAKE_INSTALL_PREFIX:PATH=*)
            echo "${arg#-DCMAKE_INSTALL_PREFIX:PATH=}" > prefix.txt
            ;;
    esac
done
"#,
    );
    let build = write_script(
        dir,
        "stub-make",
        r#"
if [ "$1" = install ]; then
    prefix=$(cat prefix.txt)
    mkdir -p "$prefix/bin" "$prefix/share/demo/schemas"
    cp compiled.bin "$prefix/bin/demo"
    echo '<schema/>' > "$prefix/share/demo/schemas/demo.xsd"
else
    cat ../*.c > compiled.bin
fi
"#,
    );
    BuildSystem {
        configure_program: configure,
        build_program: build,
        install_args: vec!["install".to_string()],
    }
}

/// A build system whose compile step always fails.
pub fn failing_build_system(dir: &Path) -> BuildSystem {
    let configure = write_script(dir, "stub-cmake-ok", "exit 0\n");
    let build = write_script(
        dir,
        "stub-make-fail",
        "echo 'demo.c:3: error: boom' >&2\nexit 2\n",
    );
    BuildSystem {
        configure_program: configure,
        build_program: build,
        install_args: vec!["install".to_string()],
    }
}
