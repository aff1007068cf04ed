//! 体数据（3D/4D脑影像）的读写与基本几何信息。

use super::voxel::Voxel;
use crate::error::{ConnectivityError, Result};
use ndarray::{Array3, Array4, ArrayView3, Axis, Ix3, Ix4};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};
use std::path::Path;
use tracing::debug;

/// NIfTI头中`xyzt_units`的时间单位掩码。
const TIME_UNITS_MASK: u8 = 0x38;
/// 时间单位为毫秒。
const UNITS_MSEC: u8 = 0x10;
/// 时间单位为微秒。
const UNITS_USEC: u8 = 0x18;
/// 空间单位毫米、时间单位秒。
const UNITS_MM_SEC: u8 = 0x02 | 0x08;

/// 一个3D或4D体数据。
///
/// 数据总是以`[x, y, z, t]`形式保存；3D图像的`t`轴长度为1。
/// 物理坐标由体素间距、各轴方向（±1）与原点决定，不考虑斜切或旋转。
#[derive(Clone, Debug)]
pub struct Volume {
    data: Array4<f32>,
    ndim: usize,
    spacing: [f64; 3],
    axis_sign: [f64; 3],
    origin: [f64; 3],
    repetition_time: f64,
    header: NiftiHeader,
}

/// 读取`path`处的NIfTI图像（`.nii`或`.nii.gz`），并要求其维数为`dimensionality`（3或4）。
///
/// 请求3D图像时，只有一帧的4D文件会被压缩为3D。
///
/// 几何信息优先取自sform，其次qform：原点取平移项，各轴方向只保留仿射矩阵对角元的符号。
/// 因此轴翻转（如LAS与RAS）能被正确处理，但轴置换与斜切的图像会被当作正交对齐，
/// 这类图像需要先重采样到与标准空间轴对齐。
pub fn read_image<P: AsRef<Path>>(path: P, dimensionality: usize) -> Result<Volume> {
    if dimensionality != 3 && dimensionality != 4 {
        return Err(ConnectivityError::InvalidParameter(format!(
            "image dimensionality must be 3 or 4, but got {dimensionality}"
        )));
    }
    let path = path.as_ref();
    let obj = ReaderOptions::new().read_file(path)?;
    let header = obj.header().clone();
    let data = obj.into_volume().into_ndarray::<f32>()?;
    let found = data.ndim();
    let mismatch = || ConnectivityError::DimensionMismatch {
        expected: dimensionality,
        found,
    };

    let data: Array4<f32> = match (dimensionality, found) {
        (3, 3) => data
            .into_dimensionality::<Ix3>()
            .map_err(|_| mismatch())?
            .insert_axis(Axis(3)),
        (3, 4) if data.shape()[3] == 1 => {
            data.into_dimensionality::<Ix4>().map_err(|_| mismatch())?
        }
        (4, 4) => data.into_dimensionality::<Ix4>().map_err(|_| mismatch())?,
        _ => return Err(mismatch()),
    };
    debug!(path = %path.display(), shape = ?data.shape(), "读取图像");

    let (spacing, axis_sign, origin, repetition_time) = geometry_of(&header);
    Ok(Volume {
        data,
        ndim: dimensionality,
        spacing,
        axis_sign,
        origin,
        repetition_time,
        header,
    })
}

/// 计算4D图像在时间轴上的平均，得到3D图像。
pub fn average_over_time(image: &Volume) -> Result<Volume> {
    if image.ndim != 4 {
        return Err(ConnectivityError::DimensionMismatch {
            expected: 4,
            found: image.ndim,
        });
    }
    let mean = image
        .data
        .mean_axis(Axis(3))
        .ok_or(ConnectivityError::InvalidParameter(
            "image has no time frames".to_string(),
        ))?;
    Ok(image.like3(mean))
}

fn geometry_of(header: &NiftiHeader) -> ([f64; 3], [f64; 3], [f64; 3], f64) {
    let spacing = [1, 2, 3].map(|i| {
        let d = header.pixdim[i].abs() as f64;
        if d > 0.0 && d.is_finite() {
            d
        } else {
            1.0
        }
    });
    let (diagonal, origin) = if header.sform_code > 0 {
        (
            [header.srow_x[0], header.srow_y[1], header.srow_z[2]],
            [header.srow_x[3], header.srow_y[3], header.srow_z[3]],
        )
    } else if header.qform_code > 0 {
        (
            qform_diagonal(header),
            [header.quatern_x, header.quatern_y, header.quatern_z],
        )
    } else {
        ([1.0; 3], [0.0; 3])
    };
    let axis_sign = diagonal.map(|d| if d < 0.0 { -1.0 } else { 1.0 });
    let origin = origin.map(|o| o as f64);
    let tr = header.pixdim[4].abs() as f64;
    let tr = match header.xyzt_units & TIME_UNITS_MASK {
        UNITS_MSEC => tr / 1_000.0,
        UNITS_USEC => tr / 1_000_000.0,
        _ => tr,
    };
    (spacing, axis_sign, origin, tr)
}

/// qform四元数旋转矩阵的对角元；`pixdim[0]`（qfac）为负时z轴翻转。
fn qform_diagonal(header: &NiftiHeader) -> [f32; 3] {
    let (b, c, d) = (header.quatern_b, header.quatern_c, header.quatern_d);
    let a = (1.0 - b * b - c * c - d * d).max(0.0).sqrt();
    let qfac = if header.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
    [
        a * a + b * b - c * c - d * d,
        a * a + c * c - b * b - d * d,
        (a * a + d * d - b * b - c * c) * qfac,
    ]
}

fn synthetic_header(shape: &[usize], spacing: [f64; 3], origin: [f64; 3], tr: f64) -> NiftiHeader {
    let mut dim = [1_u16; 8];
    dim[0] = shape.len() as u16;
    for (d, &s) in dim[1..].iter_mut().zip(shape) {
        *d = s as u16;
    }
    NiftiHeader {
        dim,
        pixdim: [
            1.0,
            spacing[0] as f32,
            spacing[1] as f32,
            spacing[2] as f32,
            tr as f32,
            1.0,
            1.0,
            1.0,
        ],
        scl_slope: 1.0,
        scl_inter: 0.0,
        xyzt_units: UNITS_MM_SEC,
        qform_code: 1,
        quatern_x: origin[0] as f32,
        quatern_y: origin[1] as f32,
        quatern_z: origin[2] as f32,
        ..NiftiHeader::default()
    }
}

impl Volume {
    /// 由内存中的3D数组构造图像，原点为0。
    pub fn from_array3(data: Array3<f32>, spacing: [f64; 3]) -> Self {
        let header = synthetic_header(data.shape(), spacing, [0.0; 3], 0.0);
        Self {
            data: data.insert_axis(Axis(3)),
            ndim: 3,
            spacing,
            axis_sign: [1.0; 3],
            origin: [0.0; 3],
            repetition_time: 0.0,
            header,
        }
    }

    /// 由内存中的4D数组构造图像，原点为0，`repetition_time`以秒为单位。
    pub fn from_array4(data: Array4<f32>, spacing: [f64; 3], repetition_time: f64) -> Self {
        let header = synthetic_header(data.shape(), spacing, [0.0; 3], repetition_time);
        Self {
            data,
            ndim: 4,
            spacing,
            axis_sign: [1.0; 3],
            origin: [0.0; 3],
            repetition_time,
            header,
        }
    }

    /// 替换原点（毫米）。
    pub fn with_origin(mut self, origin: [f64; 3]) -> Self {
        self.origin = origin;
        self.header.sform_code = 0;
        self.header.qform_code = 1;
        self.header.quatern_x = origin[0] as f32;
        self.header.quatern_y = origin[1] as f32;
        self.header.quatern_z = origin[2] as f32;
        self
    }

    /// 在同一空间网格上构造一张新的3D图像。
    pub fn like3(&self, data: Array3<f32>) -> Volume {
        debug_assert_eq!(data.shape(), &self.data.shape()[..3]);
        Volume {
            data: data.insert_axis(Axis(3)),
            ndim: 3,
            spacing: self.spacing,
            axis_sign: self.axis_sign,
            origin: self.origin,
            repetition_time: 0.0,
            header: self.header.clone(),
        }
    }

    /// 在同一空间网格上构造一张新的4D图像，沿用本图像的重复时间。
    pub fn like4(&self, data: Array4<f32>) -> Volume {
        debug_assert_eq!(&data.shape()[..3], &self.data.shape()[..3]);
        Volume {
            data,
            ndim: 4,
            spacing: self.spacing,
            axis_sign: self.axis_sign,
            origin: self.origin,
            repetition_time: self.repetition_time,
            header: self.header.clone(),
        }
    }

    /// 以本图像的头信息为参考，写出NIfTI文件。
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut header = self.header.clone();
        header.scl_slope = 1.0;
        header.scl_inter = 0.0;
        header.pixdim[4] = self.repetition_time as f32;
        header.xyzt_units = UNITS_MM_SEC;
        let writer = WriterOptions::new(path.as_ref()).reference_header(&header);
        if self.ndim == 3 {
            writer.write_nifti(&self.data.index_axis(Axis(3), 0))?;
        } else {
            writer.write_nifti(&self.data)?;
        }
        Ok(())
    }

    #[inline]
    pub fn ndim(&self) -> usize {
        self.ndim
    }

    #[inline]
    pub fn spatial_shape(&self) -> [usize; 3] {
        let s = self.data.shape();
        [s[0], s[1], s[2]]
    }

    #[inline]
    pub fn n_frames(&self) -> usize {
        self.data.shape()[3]
    }

    #[inline]
    pub fn spacing(&self) -> [f64; 3] {
        self.spacing
    }

    /// 各体素轴在物理坐标中的方向（+1或-1）。
    #[inline]
    pub fn axis_sign(&self) -> [f64; 3] {
        self.axis_sign
    }

    #[inline]
    pub fn origin(&self) -> [f64; 3] {
        self.origin
    }

    /// 重复时间（秒）；3D图像为0。
    #[inline]
    pub fn repetition_time(&self) -> f64 {
        self.repetition_time
    }

    #[inline]
    pub fn set_repetition_time(&mut self, tr: f64) {
        self.repetition_time = tr;
    }

    #[inline]
    pub fn header(&self) -> &NiftiHeader {
        &self.header
    }

    /// `[x, y, z, t]`形式的全部数据。
    #[inline]
    pub fn data(&self) -> &Array4<f32> {
        &self.data
    }

    /// 第`t`帧的只读视图。越界时panic。
    #[inline]
    pub fn frame(&self, t: usize) -> ArrayView3<f32> {
        self.data.index_axis(Axis(3), t)
    }

    /// 3D图像（或4D图像的第0帧）在体素`v`处的值。越界时返回`None`。
    #[inline]
    pub fn get(&self, v: Voxel) -> Option<f32> {
        self.data.get([v.x, v.y, v.z, 0]).copied()
    }

    /// 连续体素索引坐标对应的物理坐标（毫米）。
    #[inline]
    pub fn world(&self, index: [f64; 3]) -> [f64; 3] {
        [0, 1, 2].map(|i| self.origin[i] + index[i] * self.spacing[i] * self.axis_sign[i])
    }

    /// 物理坐标（毫米）对应的连续体素索引坐标。
    #[inline]
    pub fn continuous_index(&self, point: [f64; 3]) -> [f64; 3] {
        [0, 1, 2].map(|i| (point[i] - self.origin[i]) / (self.spacing[i] * self.axis_sign[i]))
    }
}
