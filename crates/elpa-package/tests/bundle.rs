use elpa_package::{parse_bundle, PackageError, PackageKind};

fn tarball(files: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, path, contents.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap()
}

#[test]
fn reads_descriptor_and_readme_from_tarball() {
    let bytes = tarball(&[
        (
            "bar-1.3/bar-pkg.el",
            r#"(define-package "bar" "1.3" "Bar mode" '((emacs "27.1")))"#,
        ),
        ("bar-1.3/bar.el", ";;; bar.el --- Bar mode\n"),
        ("bar-1.3/README", "Bar is a mode.\n"),
    ]);

    let desc = parse_bundle(bytes.as_slice()).unwrap();
    assert_eq!(desc.name, "bar");
    assert_eq!(desc.version.to_string(), "1.3");
    assert_eq!(desc.kind, PackageKind::Bundle);
    assert_eq!(desc.requirements[0].name, "emacs");
    assert_eq!(desc.commentary.as_deref(), Some("Bar is a mode."));
}

#[test]
fn nested_descriptor_files_are_ignored() {
    let bytes = tarball(&[(
        "bar-1.3/test/other-pkg.el",
        r#"(define-package "other" "9" "")"#,
    )]);
    assert!(matches!(
        parse_bundle(bytes.as_slice()),
        Err(PackageError::MissingDescriptor)
    ));
}

#[test]
fn garbage_is_an_error_not_a_panic() {
    let garbage = vec![0xffu8; 1024];
    assert!(parse_bundle(garbage.as_slice()).is_err());
}

#[test]
fn deeply_nested_descriptor_is_rejected() {
    let descriptor = format!(
        r#"(define-package "bar" "1.3" "Bar mode" '{})"#,
        "(".repeat(200_000)
    );
    let bytes = tarball(&[("bar-1.3/bar-pkg.el", descriptor.as_str())]);
    assert!(matches!(
        parse_bundle(bytes.as_slice()),
        Err(PackageError::Read { .. })
    ));
}
