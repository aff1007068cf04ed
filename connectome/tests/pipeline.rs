use connectome::config::PipelineConfig;
use connectome::pipeline::{labels_in_mask, Inputs, Pipeline};
use connectome::prep::Volume;
use connectome::preprocess::NoiseRoi;
use connectome::ConnectivityError;
use connectome::registration::{AffineTransform, Registration, TransformList, TransformModel};
use ndarray::{Array3, Array4};
use std::f64::consts::PI;
use std::path::{Path, PathBuf};

const N: usize = 12;
const FRAMES: usize = 100;
const TR: f64 = 2.0;
/// 图谱（8³）与脑掩膜（10³）完全对齐时的Dice系数。
const SAME_SPACE_DICE: f64 = 2.0 * 512.0 / 1512.0;
const LABELS: &str = "label,name,dmn\n\
                      1,PCC,1\n\
                      2,mPFC,1\n\
                      3,M1,0\n\
                      4,V1,0\n\
                      9,Hippocampus,1\n";

fn in_cube(x: usize, y: usize, z: usize) -> bool {
    (2..10).contains(&x) && (2..10).contains(&y) && (2..10).contains(&z)
}

/// 脑掩膜比图谱大一圈；这一圈只有噪声信号，在分割图像中标为3（CSF）。
fn in_mask(x: usize, y: usize, z: usize) -> bool {
    (1..11).contains(&x) && (1..11).contains(&y) && (1..11).contains(&z)
}

fn label_of(x: usize, y: usize, z: usize) -> f32 {
    if !in_cube(x, y, z) {
        return 0.0;
    }
    1.0 + (x >= 6) as u8 as f32 + 2.0 * (y >= 6) as u8 as f32
}

fn wave(freq: f64, t: usize, phase: f64) -> f64 {
    (2.0 * PI * freq * t as f64 * TR + phase).sin()
}

/// 脑区1、2共享0.03Hz信号，脑区3、4共享0.05Hz信号，各自另有不同频率的成分。
/// 所有频率都落在频带内且恰好是整数个周期。
fn region_signal(label: u32, t: usize) -> f64 {
    match label {
        1 => wave(0.03, t, 0.0) + 0.5 * wave(0.07, t, 1.0),
        2 => wave(0.03, t, 0.0) + 0.5 * wave(0.09, t, 2.0),
        3 => wave(0.05, t, 0.5) + 0.5 * wave(0.08, t, 0.3),
        _ => wave(0.05, t, 0.5) + 0.5 * wave(0.06, t, 1.3),
    }
}

fn write_inputs(dir: &Path) {
    let bold = Array4::from_shape_fn((N, N, N, FRAMES), |(x, y, z, t)| {
        if in_cube(x, y, z) {
            let label = label_of(x, y, z) as u32;
            (1000.0 + (x + 2 * y + 3 * z) as f64 + 5.0 * region_signal(label, t)) as f32
        } else if in_mask(x, y, z) {
            (50.0 + 20.0 * wave(0.04, t, 0.7)) as f32
        } else {
            0.0
        }
    });
    Volume::from_array4(bold, [3.0; 3], TR)
        .write(dir.join("bold.nii.gz"))
        .unwrap();
    let atlas = Array3::from_shape_fn((N, N, N), |(x, y, z)| label_of(x, y, z));
    Volume::from_array3(atlas, [3.0; 3])
        .write(dir.join("atlas.nii.gz"))
        .unwrap();
    let mask = Array3::from_shape_fn((N, N, N), |(x, y, z)| in_mask(x, y, z) as u8 as f32);
    Volume::from_array3(mask, [3.0; 3])
        .write(dir.join("mask.nii.gz"))
        .unwrap();
    let seg = Array3::from_shape_fn((N, N, N), |(x, y, z)| {
        if in_cube(x, y, z) {
            1.0
        } else if in_mask(x, y, z) {
            3.0
        } else {
            0.0
        }
    });
    Volume::from_array3(seg, [3.0; 3])
        .write(dir.join("segmentation.nii.gz"))
        .unwrap();
    std::fs::write(dir.join("labels.csv"), LABELS).unwrap();
}

fn config_for(dir: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.inputs.bold = Some(dir.join("bold.nii.gz"));
    config.inputs.atlas = Some(dir.join("atlas.nii.gz"));
    config.inputs.mask = Some(dir.join("mask.nii.gz"));
    config.inputs.label_table = Some(dir.join("labels.csv"));
    config.inputs.segmentation = Some(dir.join("segmentation.nii.gz"));
    config.preprocess.noise_roi = NoiseRoi::Segmentation { labels: vec![3] };
    config.network.density = 1.0;
    config
}

#[test]
fn test_full_pipeline_shapes() {
    let dir = tempfile::tempdir().unwrap();
    write_inputs(dir.path());
    let config = config_for(dir.path());
    let inputs = Inputs::load(&config.inputs).unwrap();
    let out = Pipeline::new(config).run(&inputs).unwrap();

    // 配准后的图谱与BOLD在同一网格上
    let atlas = &out.atlas().atlas;
    assert_eq!(atlas.spatial_shape(), inputs.bold.spatial_shape());
    assert_eq!(out.registrations.len(), 2);
    for r in &out.registrations {
        assert!((r.dice - SAME_SPACE_DICE).abs() < 1e-12);
    }

    // 时间×体素矩阵
    let n_voxels = 10 * 10 * 10;
    assert_eq!(out.mask.len(), n_voxels);
    assert_eq!(out.preprocess.matrix.dim(), (FRAMES, n_voxels));
    assert_eq!(out.preprocess.framewise_displacement.len(), FRAMES);
    assert_eq!(out.preprocess.framewise_displacement[0], 0.0);

    // 相关矩阵的维数等于掩膜内的标签数，且对称
    let n_labels = labels_in_mask(atlas, &out.mask).len();
    assert_eq!(n_labels, 4);
    let r = out.correlation.r();
    assert_eq!(r.dim(), (4, 4));
    for i in 0..4 {
        assert_eq!(r[[i, i]], 1.0);
        for j in 0..4 {
            assert_eq!(r[[i, j]], r[[j, i]]);
            assert!((0.0..=1.0).contains(&out.correlation.p_values()[[i, j]]));
        }
    }

    // 子网络中不在图谱里的成员被跳过
    assert_eq!(out.sub_correlation.dim(), 2);
    assert_eq!(out.sub_correlation.names(), &["PCC", "mPFC"]);
    assert_eq!(out.graph.n_nodes(), 2);
}

#[test]
fn test_pipeline_recovers_coupled_regions() {
    let dir = tempfile::tempdir().unwrap();
    write_inputs(dir.path());
    let mut config = config_for(dir.path());
    config.preprocess.motion_correction = false;
    config.preprocess.regress_motion = false;
    config.preprocess.smoothing_fwhm = 0.0;
    let inputs = Inputs::load(&config.inputs).unwrap();
    let out = Pipeline::new(config).run(&inputs).unwrap();

    // 噪声区域只有一个独立信号
    assert_eq!(out.preprocess.nuisance_names, vec!["compcor1"]);

    let c = &out.correlation;
    assert!(c.get("PCC", "mPFC").unwrap() > 0.7);
    assert!(c.get("M1", "V1").unwrap() > 0.7);
    assert!(c.get("PCC", "M1").unwrap().abs() < 0.1);
    assert!(c.p_values()[[0, 1]] < 0.001);

    assert_eq!(out.graph.edges().len(), 1);
    assert_eq!(out.graph.global_efficiency(), Some(1.0));
}

/// 写出只有x平移的运动参数文件，`tx(t)`给出第`t`帧的平移（毫米）。
fn write_motion(dir: &Path, tx: impl Fn(usize) -> f64) -> PathBuf {
    let mut text = String::from("# tx ty tz rx ry rz\n");
    for t in 0..FRAMES {
        text.push_str(&format!("{} 0 0 0 0 0\n", tx(t)));
    }
    let path = dir.join("motion.par");
    std::fs::write(&path, text).unwrap();
    path
}

#[test]
fn test_scrubbing_drops_high_motion_frames() {
    let dir = tempfile::tempdir().unwrap();
    write_inputs(dir.path());
    let mut config = config_for(dir.path());
    config.preprocess.motion_correction = false;
    config.preprocess.motion_parameters =
        Some(write_motion(dir.path(), |t| if t == 50 { 2.0 } else { 0.0 }));
    config.preprocess.scrub = true;
    let inputs = Inputs::load(&config.inputs).unwrap();
    let out = Pipeline::new(config).run(&inputs).unwrap();

    // 第50帧移入、第51帧移回，两帧的FD都是2mm
    let fd = &out.preprocess.framewise_displacement;
    assert_eq!(fd[50], 2.0);
    assert_eq!(fd[51], 2.0);
    assert_eq!(out.preprocess.n_censored(), 2);
    assert!(out.preprocess.censored[50] && out.preprocess.censored[51]);
    assert_eq!(out.preprocess.nuisance_names[0], "tx");

    // 预处理仍在全部帧上进行，相关只用保留下来的帧
    assert_eq!(out.preprocess.matrix.nrows(), FRAMES);
    assert_eq!(out.regions.n_frames(), FRAMES - 2);
    assert_eq!(out.correlation.n_samples(), FRAMES - 2);
    assert_eq!(out.sub_correlation.n_samples(), FRAMES - 2);
}

#[test]
fn test_scrubbing_too_many_frames_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write_inputs(dir.path());
    let mut config = config_for(dir.path());
    config.preprocess.motion_correction = false;
    config.preprocess.motion_parameters =
        Some(write_motion(dir.path(), |t| if t % 2 == 1 { 2.0 } else { 0.0 }));
    config.preprocess.scrub = true;
    let inputs = Inputs::load(&config.inputs).unwrap();
    let pipeline = Pipeline::new(config.clone());
    // 除第0帧外每帧都超过阈值
    assert!(matches!(
        pipeline.run(&inputs),
        Err(ConnectivityError::InvalidParameter(_))
    ));

    // 不删帧时同样的输入可以正常计算
    config.preprocess.scrub = false;
    let out = Pipeline::new(config).run(&inputs).unwrap();
    assert_eq!(out.preprocess.n_censored(), FRAMES - 1);
    assert_eq!(out.correlation.n_samples(), FRAMES);
}

#[test]
fn test_pipeline_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    write_inputs(dir.path());
    let config = config_for(dir.path());
    let inputs = Inputs::load(&config.inputs).unwrap();
    let pipeline = Pipeline::new(config);
    let a = pipeline.run(&inputs).unwrap();
    let b = pipeline.run(&inputs).unwrap();
    assert_eq!(a.correlation.r(), b.correlation.r());
    assert_eq!(a.preprocess.matrix, b.preprocess.matrix);
    assert_eq!(a.graph.edges(), b.graph.edges());
}

#[test]
fn test_unknown_network_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write_inputs(dir.path());
    let mut config = config_for(dir.path());
    config.network.name = "salience".to_string();
    let inputs = Inputs::load(&config.inputs).unwrap();
    assert!(matches!(
        Pipeline::new(config).run(&inputs),
        Err(ConnectivityError::UnknownNetwork(_))
    ));
}

#[test]
fn test_mask_grid_mismatch_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write_inputs(dir.path());
    let config = config_for(dir.path());
    let mut inputs = Inputs::load(&config.inputs).unwrap();
    inputs.mask = Volume::from_array3(Array3::from_elem((N, N, N - 1), 1.0), [3.0; 3]);
    assert!(Pipeline::new(config).run(&inputs).is_err());
}

/// 图谱本来就在BOLD空间时使用的恒等配准。
struct SameSpace;

impl Registration for SameSpace {
    fn register(
        &self,
        _fixed: &Volume,
        _moving: &Volume,
        model: TransformModel,
    ) -> connectome::Result<TransformList> {
        TransformList::from_forward(model, AffineTransform::identity())
    }
}

#[test]
fn test_custom_registration() {
    let dir = tempfile::tempdir().unwrap();
    write_inputs(dir.path());
    let config = config_for(dir.path());
    let inputs = Inputs::load(&config.inputs).unwrap();
    let out = Pipeline::new(config)
        .with_registration(SameSpace)
        .run(&inputs)
        .unwrap();
    assert!((out.atlas().dice - SAME_SPACE_DICE).abs() < 1e-12);
    assert_eq!(out.atlas().atlas.data(), inputs.atlas.data());
    assert_eq!(out.regions.n_regions(), 4);
}
