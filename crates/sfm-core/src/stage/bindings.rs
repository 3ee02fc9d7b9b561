//! Candidate bindings for each stage, in preference order.
//!
//! Keyword bindings come first; the trailing positional bindings are the
//! calling conventions seen in the wild for each entry point.

use super::{ArgValue, Binding};
use serde_json::Value;
use std::path::Path;

/// Exhaustive pair generation: an image source and the pair list to write.
pub fn pairing_bindings(images_dir: &Path, image_list: &Path, output: &Path) -> Vec<Binding> {
    vec![
        Binding::keyword(
            "image_dir+output",
            vec![
                ("image_dir", ArgValue::path(images_dir)),
                ("output", ArgValue::path(output)),
            ],
        ),
        Binding::keyword(
            "image_list+output",
            vec![
                ("image_list", ArgValue::path(image_list)),
                ("output", ArgValue::path(output)),
            ],
        ),
        Binding::positional(
            "positional(image_list, output)",
            vec![ArgValue::path(image_list), ArgValue::path(output)],
        )
        .with_hint(0, "list"),
        Binding::positional(
            "positional(image_dir, output)",
            vec![ArgValue::path(images_dir), ArgValue::path(output)],
        ),
    ]
}

/// Feature extraction into `export_dir`.
pub fn extraction_bindings(
    conf: &Value,
    images_dir: &Path,
    image_list: &Path,
    export_dir: &Path,
) -> Vec<Binding> {
    vec![
        Binding::keyword(
            "conf+image_dir+export_dir",
            vec![
                ("conf", ArgValue::Conf(conf.clone())),
                ("image_dir", ArgValue::path(images_dir)),
                ("export_dir", ArgValue::path(export_dir)),
            ],
        ),
        Binding::positional(
            "positional(conf, image_list, export_dir)",
            vec![
                ArgValue::Conf(conf.clone()),
                ArgValue::path(image_list),
                ArgValue::path(export_dir),
            ],
        )
        .with_hint(1, "list"),
        Binding::positional(
            "positional(conf, image_dir, export_dir)",
            vec![
                ArgValue::Conf(conf.clone()),
                ArgValue::path(images_dir),
                ArgValue::path(export_dir),
            ],
        ),
    ]
}

/// Feature matching over the pair list, reading features by name.
pub fn matching_bindings(
    conf: &Value,
    pairs: &Path,
    features_name: &str,
    export_dir: &Path,
) -> Vec<Binding> {
    vec![
        Binding::keyword(
            "conf+pairs+features+export_dir",
            vec![
                ("conf", ArgValue::Conf(conf.clone())),
                ("pairs", ArgValue::path(pairs)),
                ("features", ArgValue::Text(features_name.to_string())),
                ("export_dir", ArgValue::path(export_dir)),
            ],
        ),
        Binding::positional(
            "positional(conf, pairs, features, export_dir)",
            vec![
                ArgValue::Conf(conf.clone()),
                ArgValue::path(pairs),
                ArgValue::Text(features_name.to_string()),
                ArgValue::path(export_dir),
            ],
        ),
        Binding::positional(
            "positional(conf, pairs, export_dir)+features",
            vec![
                ArgValue::Conf(conf.clone()),
                ArgValue::path(pairs),
                ArgValue::path(export_dir),
            ],
        )
        .with_keyword("features", ArgValue::Text(features_name.to_string())),
    ]
}

/// Paths consumed by the reconstruction stage.
#[derive(Debug, Clone, Copy)]
pub struct ReconstructionInputs<'a> {
    pub sfm_dir: &'a Path,
    pub images_dir: &'a Path,
    pub pairs: &'a Path,
    pub features: &'a Path,
    pub matches: &'a Path,
}

pub fn reconstruction_bindings(inputs: ReconstructionInputs<'_>) -> Vec<Binding> {
    let ReconstructionInputs {
        sfm_dir,
        images_dir,
        pairs,
        features,
        matches,
    } = inputs;

    vec![
        Binding::keyword(
            "sfm_dir+image_dir+pairs+features+matches",
            vec![
                ("sfm_dir", ArgValue::path(sfm_dir)),
                ("image_dir", ArgValue::path(images_dir)),
                ("pairs", ArgValue::path(pairs)),
                ("features", ArgValue::path(features)),
                ("matches", ArgValue::path(matches)),
            ],
        ),
        Binding::positional(
            "positional(image_dir, sfm_dir, pairs, features, matches)",
            vec![
                ArgValue::path(images_dir),
                ArgValue::path(sfm_dir),
                ArgValue::path(pairs),
                ArgValue::path(features),
                ArgValue::path(matches),
            ],
        )
        .with_hint(0, "image"),
        Binding::positional(
            "positional(sfm_dir, image_dir, pairs, features, matches)",
            vec![
                ArgValue::path(sfm_dir),
                ArgValue::path(images_dir),
                ArgValue::path(pairs),
                ArgValue::path(features),
                ArgValue::path(matches),
            ],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_every_list_ends_with_unhinted_positional_default() {
        let p = Path::new("/x");
        let conf = json!({});
        let lists = [
            pairing_bindings(p, p, p),
            extraction_bindings(&conf, p, p, p),
            matching_bindings(&conf, p, "feats", p),
            reconstruction_bindings(ReconstructionInputs {
                sfm_dir: p,
                images_dir: p,
                pairs: p,
                features: p,
                matches: p,
            }),
        ];
        for list in lists {
            assert!(list[0].is_keyword());
            assert!(list
                .iter()
                .any(|b| !b.is_keyword() && b.hint.is_none()));
        }
    }

    #[test]
    fn test_matching_mixed_binding_passes_features_by_name() {
        let b = matching_bindings(&json!({}), Path::new("/p"), "feats-superpoint", Path::new("/e"));
        let mixed = &b[2];
        assert_eq!(mixed.positional.len(), 3);
        assert_eq!(
            mixed.keyword,
            vec![("features".to_string(), ArgValue::Text("feats-superpoint".into()))]
        );
    }
}
