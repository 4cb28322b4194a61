// 该文件是 Kanjian （看见） 项目的一部分。
// src/notification.rs - 用户通知
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

use std::fmt;

/// 通知类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
  /// 提示信息，例如未检测到物体
  Info,
  /// 输入校验错误，例如文件类型不正确
  Validation,
  /// 运行错误，例如摄像头不可用、模型加载失败
  Operational,
}

/// 非阻塞的用户通知，包含标题与描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
  pub kind: NotificationKind,
  pub title: String,
  pub description: String,
}

impl Notification {
  pub fn info(title: &str, description: &str) -> Self {
    Self::new(NotificationKind::Info, title, description)
  }

  pub fn validation(title: &str, description: &str) -> Self {
    Self::new(NotificationKind::Validation, title, description)
  }

  pub fn operational(title: &str, description: &str) -> Self {
    Self::new(NotificationKind::Operational, title, description)
  }

  fn new(kind: NotificationKind, title: &str, description: &str) -> Self {
    Self {
      kind,
      title: title.to_string(),
      description: description.to_string(),
    }
  }

  pub fn is_error(&self) -> bool {
    self.kind != NotificationKind::Info
  }
}

impl fmt::Display for Notification {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}: {}", self.title, self.description)
  }
}
