// 该文件是 Kanjian （看见） 项目的一部分。
// src/args.rs - 命令行参数
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::path::PathBuf;

use clap::Parser;
use url::Url;

/// Kanjian 采集-检测演示
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 推理服务
  /// - json:///path/result.json   回放固定的检测结果
  /// - exec:///path/detector?arg=..  调用外部检测程序（stdin 输入 PNG，stdout 输出 JSON）
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 图像来源
  /// - image:///path/photo.jpg
  /// - camera:///dev/video0
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 输出路径，例如 image:///tmp/out.png（加 ?record 同时保存检测记录）
  #[arg(long, value_name = "OUTPUT")]
  pub output: Option<Url>,

  /// 显示宽度（像素），默认使用图像原始尺寸
  #[arg(long, value_name = "PIXELS")]
  pub display_width: Option<u32>,

  /// 标签字体文件（TTF/OTF），未指定时不绘制标签文字
  #[arg(long, value_name = "FONT")]
  pub font: Option<PathBuf>,

  /// 不在启动时预加载模型
  #[arg(long)]
  pub no_prewarm: bool,
}
