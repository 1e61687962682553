use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Alias::new("system_info"))
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Alias::new("id"))
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Alias::new("hostname")).string().not_null())
                    .col(ColumnDef::new(Alias::new("static_ip")).string().null())
                    .col(ColumnDef::new(Alias::new("nickname")).string().null())
                    .col(
                        ColumnDef::new(Alias::new("physical_location"))
                            .string()
                            .null(),
                    )
                    .col(ColumnDef::new(Alias::new("username")).string().not_null())
                    .col(ColumnDef::new(Alias::new("password")).text().not_null())
                    .col(
                        ColumnDef::new(Alias::new("entry_created_ts"))
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Alias::new("entry_modified_ts"))
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Alias::new("entry_retired_ts"))
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Alias::new("record_creation_source"))
                            .string()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        // SQLite cannot add foreign keys after the fact, so the FK lives in the table definition.
        manager
            .create_table(
                Table::create()
                    .table(Alias::new("check_server"))
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Alias::new("id"))
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Alias::new("parent_id")).integer().not_null())
                    .col(ColumnDef::new(Alias::new("port")).integer().not_null())
                    .col(
                        ColumnDef::new(Alias::new("address_suffix"))
                            .string()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(Alias::new("status_condition_type"))
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Alias::new("status_condition_value"))
                            .json()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_check_server_parent_id")
                            .from(Alias::new("check_server"), Alias::new("parent_id"))
                            .to(Alias::new("system_info"), Alias::new("id"))
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("unique_check_server")
                    .table(Alias::new("check_server"))
                    .col(Alias::new("parent_id"))
                    .col(Alias::new("port"))
                    .col(Alias::new("address_suffix"))
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_system_info_hostname")
                    .table(Alias::new("system_info"))
                    .col(Alias::new("hostname"))
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(
                Table::drop()
                    .table(Alias::new("check_server"))
                    .if_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(
                Table::drop()
                    .table(Alias::new("system_info"))
                    .if_exists()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }
}
