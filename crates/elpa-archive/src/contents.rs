use elpa_package::sexp::Sexp;
use elpa_package::{PackageDescriptor, Version};

/// Format version written as the first element of `archive-contents`.
pub const ARCHIVE_PROTOCOL_VERSION: i64 = 1;

/// Renders descriptors in the `archive-contents` form polled by clients:
///
/// ```text
/// (1
///  (foo . [(1 2) ((dash (2 0))) "Summary" single]))
/// ```
pub fn render<'a>(packages: impl IntoIterator<Item = &'a PackageDescriptor>) -> String {
    let mut out = format!("({ARCHIVE_PROTOCOL_VERSION}");
    for descriptor in packages {
        out.push_str("\n ");
        out.push_str(&entry(descriptor).to_string());
    }
    out.push_str(")\n");
    out
}

/// `(name . [version requirements summary kind])` for one descriptor.
pub fn entry(descriptor: &PackageDescriptor) -> Sexp {
    let requirements = descriptor
        .requirements
        .iter()
        .map(|req| {
            Sexp::List(vec![
                Sexp::symbol(req.name.as_str()),
                version_list(&req.version),
            ])
        })
        .collect();

    Sexp::Dotted(
        vec![Sexp::symbol(descriptor.name.as_str())],
        Box::new(Sexp::Vector(vec![
            version_list(&descriptor.version),
            Sexp::List(requirements),
            Sexp::string(descriptor.summary.as_str()),
            Sexp::symbol(descriptor.kind.archive_symbol()),
        ])),
    )
}

fn version_list(version: &Version) -> Sexp {
    Sexp::List(
        version
            .components()
            .iter()
            // `Version` bounds components by `i64::MAX`.
            .map(|&c| Sexp::Int(c as i64))
            .collect(),
    )
}
